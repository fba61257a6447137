//! Zip archive jobs end to end.

#[cfg(test)]
mod tests {
  use std::{fs::File, io::Write, path::Path};

  use zip::{ZipWriter, write::SimpleFileOptions};

  use crate::{
    domain::{
      document::doc_id,
      job::{JobKind, JobStatus},
    },
    pipeline::__tests__::helpers::{PipelineTestContext, assert_accounted},
  };

  fn build_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, body) in entries {
      writer.start_file(*name, SimpleFileOptions::default()).unwrap();
      writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
  }

  #[tokio::test]
  async fn test_zip_job_indexes_entries() {
    let ctx = PipelineTestContext::new();
    let archive = ctx.input_dir.path().join("handbook.zip");
    build_zip(
      &archive,
      &[
        ("handbook/intro.md", "# Welcome\nRead this first."),
        ("handbook/policies/leave.txt", "Leave policy for all employees"),
        ("handbook/__MACOSX/._intro.md", "junk"),
        ("handbook/logo.ico", "ICO"),
      ],
    );

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 2);
    assert_eq!(snap.skipped, 2);
    assert_eq!(snap.indexed, 2);
    assert_accounted(&snap);

    let root = archive.to_string_lossy();
    let leave = ctx.engine.get(&doc_id(&root, "handbook/policies/leave.txt")).unwrap();
    assert_eq!(leave["source"], "zip");
    assert_eq!(leave["file_type"], ".txt");
    assert_eq!(leave["file_path"], format!("zip://{root}#handbook/policies/leave.txt"));
  }

  #[tokio::test]
  async fn test_corrupt_zip_fails_job() {
    let ctx = PipelineTestContext::new();
    let archive = ctx.write_input("broken.zip", b"PK but not really");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Failed);
    assert!(snap.fatal_error.unwrap().starts_with("Unreadable archive"));
  }
}
