//! FolderWalker - filesystem tree producer.
//!
//! Enumerates the whole tree first so `total` is known before any extraction
//! starts, then extracts eligible files one at a time in path order.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use super::{
  extract::TextExtractor,
  source::{BlockingSource, EventSender, RecordSource, SourceError, SourceEvent, SourceOutcome},
};
use crate::domain::document::{ExtractionRecord, Provenance, SourceKind, entry_name, extension_of};

/// Operating-system metadata files that are never indexed
const OS_METADATA: &[&str] = &["thumbs.db", "desktop.ini"];

/// Decides which entries are worth extracting
#[derive(Debug, Clone)]
pub struct EntryFilter {
  allowed: HashSet<String>,
}

impl EntryFilter {
  pub fn new(allowed: &[String]) -> Self {
    Self {
      allowed: allowed
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .collect(),
    }
  }

  /// Hidden files and OS metadata
  pub fn is_ignored(&self, entry: &str) -> bool {
    let name = entry_name(entry);
    name.starts_with('.') || OS_METADATA.contains(&name.to_lowercase().as_str())
  }

  /// Lowercase extension when the entry should be extracted
  pub fn eligible(&self, entry: &str) -> Option<String> {
    if self.is_ignored(entry) {
      return None;
    }
    let ext = extension_of(entry).to_lowercase();
    self.allowed.contains(&ext).then_some(ext)
  }
}

struct Candidate {
  path: PathBuf,
  entry: String,
  ext: String,
  size: u64,
}

pub struct FolderWalker {
  inner: BlockingSource,
}

impl FolderWalker {
  pub fn spawn(root: &Path, filter: EntryFilter, extractor: TextExtractor) -> Result<Self, SourceError> {
    if !root.is_dir() {
      return Err(SourceError::NotFound(root.to_path_buf()));
    }
    let provenance = Provenance::new(SourceKind::Folder, root);
    let runtime = Handle::current();
    let root = root.to_path_buf();
    let inner = BlockingSource::spawn(provenance, move |tx| walk(&root, &filter, &extractor, &runtime, &tx));
    Ok(Self { inner })
  }
}

#[async_trait]
impl RecordSource for FolderWalker {
  fn provenance(&self) -> &Provenance {
    self.inner.provenance()
  }

  async fn next(&mut self) -> Option<SourceEvent> {
    self.inner.next().await
  }

  async fn finish(self: Box<Self>) -> SourceOutcome {
    Box::new(self.inner).finish().await
  }
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
  entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name().to_string_lossy().starts_with('.')
}

fn relative(root: &Path, path: &Path) -> String {
  path
    .strip_prefix(root)
    .unwrap_or(path)
    .to_string_lossy()
    .replace('\\', "/")
}

fn walk(
  root: &Path,
  filter: &EntryFilter,
  extractor: &TextExtractor,
  runtime: &Handle,
  tx: &EventSender,
) -> Result<(), String> {
  let mut candidates = Vec::new();

  let walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| !is_hidden_dir(e));

  for item in walker {
    let entry = match item {
      Ok(entry) => entry,
      Err(e) if e.depth() == 0 => return Err(format!("Cannot read folder {}: {e}", root.display())),
      Err(e) => {
        if !tx.send(SourceEvent::Notice(format!("Walk error: {e}"))) {
          return Ok(());
        }
        continue;
      }
    };
    if !entry.file_type().is_file() {
      continue;
    }

    let rel = relative(root, entry.path());
    match filter.eligible(&rel) {
      Some(ext) => candidates.push(Candidate {
        size: entry.metadata().map(|m| m.len()).unwrap_or(0),
        path: entry.into_path(),
        entry: rel,
        ext,
      }),
      None => {
        if !tx.send(SourceEvent::Skipped { entry: rel }) {
          return Ok(());
        }
      }
    }
  }

  debug!(root = %root.display(), eligible = candidates.len(), "Folder enumerated");
  if !tx.send(SourceEvent::Discovered(candidates.len() as u64)) {
    return Ok(());
  }

  for candidate in candidates {
    let event = match runtime.block_on(extractor.extract(&candidate.path, &candidate.ext)) {
      Ok(text) => SourceEvent::Record(ExtractionRecord {
        path: candidate.entry,
        text,
        size: candidate.size,
        ..Default::default()
      }),
      Err(e) => {
        trace!(entry = %candidate.entry, error = %e, "Extraction failed");
        SourceEvent::Failed {
          entry: candidate.entry,
          reason: e.to_string(),
        }
      }
    };
    if !tx.send(event) {
      break;
    }
  }
  Ok(())
}
