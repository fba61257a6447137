//! ArchiveReader - `.zip` producer.

use std::{
  fs::{self, File},
  io::{self, BufReader, Read},
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use zip::ZipArchive;

use super::{
  extract::{TextExtractor, scratch_path},
  folder::EntryFilter,
  source::{BlockingSource, EventSender, RecordSource, SourceError, SourceEvent, SourceOutcome},
};
use crate::domain::document::{ExtractionRecord, Provenance, SourceKind};

pub struct ArchiveReader {
  inner: BlockingSource,
}

impl ArchiveReader {
  /// `scratch` receives one temporary file per entry while it is extracted.
  pub fn spawn(
    archive: &Path,
    scratch: PathBuf,
    filter: EntryFilter,
    extractor: TextExtractor,
  ) -> Result<Self, SourceError> {
    if !archive.is_file() {
      return Err(SourceError::NotFound(archive.to_path_buf()));
    }
    let provenance = Provenance::new(SourceKind::Zip, archive);
    let runtime = Handle::current();
    let archive = archive.to_path_buf();
    let inner = BlockingSource::spawn(provenance, move |tx| {
      read(&archive, &scratch, &filter, &extractor, &runtime, &tx)
    });
    Ok(Self { inner })
  }
}

#[async_trait]
impl RecordSource for ArchiveReader {
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

fn write_entry(entry: &mut impl Read, path: &Path) -> io::Result<()> {
  let mut out = File::create(path)?;
  io::copy(entry, &mut out)?;
  Ok(())
}

fn read(
  archive: &Path,
  scratch: &Path,
  filter: &EntryFilter,
  extractor: &TextExtractor,
  runtime: &Handle,
  tx: &EventSender,
) -> Result<(), String> {
  let file = File::open(archive).map_err(|e| format!("Cannot open archive {}: {e}", archive.display()))?;
  let mut zip =
    ZipArchive::new(BufReader::new(file)).map_err(|e| format!("Unreadable archive {}: {e}", archive.display()))?;

  let mut eligible = Vec::new();
  for index in 0..zip.len() {
    let entry = match zip.by_index_raw(index) {
      Ok(entry) => entry,
      Err(e) => {
        if !tx.send(SourceEvent::Notice(format!("Unreadable entry #{index}: {e}"))) {
          return Ok(());
        }
        continue;
      }
    };
    if entry.is_dir() {
      continue;
    }
    let name = entry.name().to_string();
    match filter.eligible(&name) {
      Some(ext) => eligible.push((index, name, ext)),
      None => {
        if !tx.send(SourceEvent::Skipped { entry: name }) {
          return Ok(());
        }
      }
    }
  }

  debug!(archive = %archive.display(), eligible = eligible.len(), "Archive enumerated");
  if !tx.send(SourceEvent::Discovered(eligible.len() as u64)) {
    return Ok(());
  }
  fs::create_dir_all(scratch).map_err(|e| format!("Cannot create {}: {e}", scratch.display()))?;

  for (index, name, ext) in eligible {
    let event = match zip.by_index(index) {
      Ok(mut entry) => {
        let size = entry.size();
        let tmp = scratch_path(scratch, index, &ext);
        let extracted = match write_entry(&mut entry, &tmp) {
          Ok(()) => runtime
            .block_on(extractor.extract(&tmp, &ext))
            .map_err(|e| e.to_string()),
          Err(e) => Err(format!("Cannot unpack: {e}")),
        };
        let _ = fs::remove_file(&tmp);

        match extracted {
          Ok(text) => SourceEvent::Record(ExtractionRecord {
            path: name,
            text,
            size,
            ..Default::default()
          }),
          Err(reason) => {
            trace!(entry = %name, reason, "Extraction failed");
            SourceEvent::Failed { entry: name, reason }
          }
        }
      }
      Err(e) => SourceEvent::Failed {
        entry: name,
        reason: format!("Cannot unpack: {e}"),
      },
    };
    if !tx.send(event) {
      break;
    }
  }
  Ok(())
}
