//! Adoption of extractor-rendered thumbnails into permanent storage.
//!
//! The extractor renders `*_thumb_0_large.jpg` / `*_thumb_0_small.jpg` into a
//! per-entry staging directory. Adoption moves that directory to
//! `<root>/<doc_id>`, renames the files after the document id, and returns the
//! image metadata to store on the document.

use std::{
  fs, io,
  path::{Path, PathBuf},
};

use tracing::trace;
use walkdir::WalkDir;

use crate::domain::document::ImageMetadata;

const THUMB_MARKER: &str = "_thumb_0_";

#[derive(Debug, thiserror::Error)]
pub enum AdoptError {
  #[error("Staging directory not found: {0}")]
  MissingStaging(PathBuf),
  #[error("No primary thumbnail staged for {0}")]
  NoThumbnails(String),
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
  #[error("Adoption task failed: {0}")]
  Join(String),
}

#[derive(Debug, Clone)]
pub struct ThumbnailStore {
  root: PathBuf,
  url_prefix: String,
}

impl ThumbnailStore {
  pub fn new(root: PathBuf, url_prefix: &str) -> Self {
    Self {
      root,
      url_prefix: url_prefix.trim_end_matches('/').to_string(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Adopt on the blocking pool.
  pub async fn adopt(&self, staging: PathBuf, doc_id: String) -> Result<ImageMetadata, AdoptError> {
    let store = self.clone();
    tokio::task::spawn_blocking(move || store.adopt_blocking(&staging, &doc_id))
      .await
      .map_err(|e| AdoptError::Join(e.to_string()))?
  }

  /// Move `staging` to `<root>/<doc_id>` and describe the result.
  ///
  /// Idempotent: when the staging directory is gone but the document's
  /// directory already holds adopted thumbnails, those are described again.
  pub fn adopt_blocking(&self, staging: &Path, doc_id: &str) -> Result<ImageMetadata, AdoptError> {
    let target = self.root.join(doc_id);

    if !staging.is_dir() {
      if target.is_dir() {
        return self.describe(&target, doc_id);
      }
      return Err(AdoptError::MissingStaging(staging.to_path_buf()));
    }

    fs::create_dir_all(&self.root)?;
    if target.exists() {
      fs::remove_dir_all(&target)?;
    }
    move_dir(staging, &target)?;

    for entry in fs::read_dir(&target)? {
      let entry = entry?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if let Some(renamed) = canonical_name(&name, doc_id)
        && renamed != name
      {
        fs::rename(entry.path(), target.join(&renamed))?;
      }
    }

    trace!(doc_id, target = %target.display(), "Adopted thumbnails");
    self.describe(&target, doc_id)
  }

  fn describe(&self, dir: &Path, doc_id: &str) -> Result<ImageMetadata, AdoptError> {
    let mut names: Vec<String> = fs::read_dir(dir)?
      .filter_map(|e| e.ok())
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .filter(|n| n.starts_with(doc_id) && n.contains(THUMB_MARKER) && n.ends_with(".jpg"))
      .collect();
    names.sort();

    let url = |name: &str| format!("{}/{}/{}", self.url_prefix, doc_id, name);
    let first_image = names.iter().find(|n| n.ends_with("_large.jpg")).map(|n| url(n));
    let all_images: Vec<String> = names.iter().filter(|n| n.ends_with("_small.jpg")).map(|n| url(n)).collect();

    match first_image {
      Some(first_image) => Ok(ImageMetadata {
        has_images: true,
        image_count: 1,
        first_image,
        all_images,
      }),
      None => Err(AdoptError::NoThumbnails(doc_id.to_string())),
    }
  }
}

/// `<anything>_thumb_0_<size>.jpg` -> `<doc_id>_thumb_0_<size>.jpg`
fn canonical_name(name: &str, doc_id: &str) -> Option<String> {
  if !name.ends_with(".jpg") {
    return None;
  }
  let (_, size) = name.rsplit_once(THUMB_MARKER)?;
  Some(format!("{doc_id}{THUMB_MARKER}{size}"))
}

fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
  match fs::rename(from, to) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
      copy_dir(from, to)?;
      fs::remove_dir_all(from)
    }
    Err(e) => Err(e),
  }
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
  for entry in WalkDir::new(from) {
    let entry = entry.map_err(io::Error::other)?;
    let relative = entry.path().strip_prefix(from).map_err(io::Error::other)?;
    let dest = to.join(relative);
    if entry.file_type().is_dir() {
      fs::create_dir_all(&dest)?;
    } else {
      fs::copy(entry.path(), &dest)?;
    }
  }
  Ok(())
}
