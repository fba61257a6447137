//! Extraction records and the documents committed to the search index.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  Zim,
  Zip,
  Folder,
}

impl SourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceKind::Zim => "zim",
      SourceKind::Zip => "zip",
      SourceKind::Folder => "folder",
    }
  }
}

/// Why the extractor declined to produce a thumbnail for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSkip {
  Icon,
  NotFound,
}

/// One unit produced by a record source.
///
/// Streaming extractor lines decode straight into this; missing fields take
/// their defaults so older extractor builds stay readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRecord {
  /// Entry path relative to the source root
  pub path: String,
  pub title: String,
  pub text: String,
  pub size: u64,
  /// Staging directory holding pre-rendered thumbnails, empty when none
  pub thumb_dir: String,
  /// "icon" or "not_found" when the extractor skipped the entry's image
  pub image_skipped: String,
}

impl ExtractionRecord {
  pub fn staging_dir(&self) -> Option<PathBuf> {
    (!self.thumb_dir.is_empty()).then(|| PathBuf::from(&self.thumb_dir))
  }

  pub fn skip_reason(&self) -> Option<ImageSkip> {
    match self.image_skipped.as_str() {
      "icon" => Some(ImageSkip::Icon),
      "not_found" => Some(ImageSkip::NotFound),
      _ => None,
    }
  }

  /// Character count of the text with surrounding whitespace removed
  pub fn meaningful_chars(&self) -> usize {
    self.text.trim().chars().count()
  }
}

/// Thumbnail fields carried on a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
  pub has_images: bool,
  pub image_count: u32,
  pub first_image: String,
  pub all_images: Vec<String>,
}

/// A partial update that attaches thumbnails to an already indexed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePatch {
  pub id: String,
  #[serde(flatten)]
  pub images: ImageMetadata,
}

/// Root of a job's records, used for ids and provenance fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
  pub source: SourceKind,
  pub root: String,
}

impl Provenance {
  pub fn new(source: SourceKind, root: &Path) -> Self {
    Self {
      source,
      root: root.to_string_lossy().into_owned(),
    }
  }

  pub fn file_path(&self, entry: &str) -> String {
    match self.source {
      SourceKind::Zim => format!("zim://{}#{}", self.root, entry),
      SourceKind::Zip => format!("zip://{}#{}", self.root, entry),
      SourceKind::Folder => Path::new(&self.root).join(entry).to_string_lossy().into_owned(),
    }
  }
}

/// A commit-ready search document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
  pub id: String,
  pub filename: String,
  pub content: String,
  pub file_type: String,
  pub file_size: u64,
  pub uploaded_at: DateTime<Utc>,
  pub file_path: String,
  pub source: SourceKind,
  pub folder_root: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub zim_article_url: Option<String>,
  #[serde(flatten)]
  pub images: ImageMetadata,
}

impl IndexDocument {
  /// Normalize a record into a document without image metadata.
  pub fn from_record(provenance: &Provenance, record: &ExtractionRecord, max_content_chars: usize) -> Self {
    let filename = if record.title.trim().is_empty() {
      entry_name(&record.path).to_string()
    } else {
      record.title.clone()
    };

    let (file_type, zim_article_url) = match provenance.source {
      SourceKind::Zim => (".zim".to_string(), Some(record.path.clone())),
      _ => (normalize_file_type(extension_of(&record.path)), None),
    };

    Self {
      id: doc_id(&provenance.root, &record.path),
      filename,
      content: truncate_chars(record.text.trim(), max_content_chars),
      file_type,
      file_size: record.size,
      uploaded_at: Utc::now(),
      file_path: provenance.file_path(&record.path),
      source: provenance.source,
      folder_root: provenance.root.clone(),
      zim_article_url,
      images: ImageMetadata::default(),
    }
  }
}

/// Deterministic document id for an entry under a root.
///
/// Re-ingesting the same entry yields the same id, so commits upsert.
pub fn doc_id(root: &str, entry: &str) -> String {
  Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{root}#{entry}").as_bytes()).to_string()
}

/// Lowercase with a single leading dot (`PDF` -> `.pdf`)
pub fn normalize_file_type(ext: &str) -> String {
  let ext = ext.trim().trim_start_matches('.');
  if ext.is_empty() {
    return String::new();
  }
  format!(".{}", ext.to_lowercase())
}

/// Lowercase extension of an entry path without the dot
pub fn extension_of(entry: &str) -> &str {
  let name = entry_name(entry);
  match name.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => ext,
    _ => "",
  }
}

/// Final path component of an entry, accepting either separator
pub fn entry_name(entry: &str) -> &str {
  entry.rsplit(['/', '\\']).next().unwrap_or(entry)
}

fn truncate_chars(text: &str, max: usize) -> String {
  match text.char_indices().nth(max) {
    Some((idx, _)) => text[..idx].to_string(),
    None => text.to_string(),
  }
}
