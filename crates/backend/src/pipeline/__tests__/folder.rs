//! Folder-sync jobs end to end.

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use crate::{
    domain::{
      document::doc_id,
      job::{JobKind, JobStatus},
    },
    pipeline::__tests__::helpers::{PipelineTestContext, assert_accounted},
  };

  fn seed(ctx: &PipelineTestContext) {
    ctx.write_input("docs/readme.md", b"# Project\nHow the project is organized.");
    ctx.write_input("docs/notes/meeting.txt", b"Meeting notes for the planning session");
    ctx.write_input("docs/notes/todo.txt", b"short");
    ctx.write_input("docs/photos/cat.png", b"\x89PNG");
    ctx.write_input("docs/setup.exe", b"MZ");
    ctx.write_input("docs/.DS_Store", b"\0");
    ctx.write_input("docs/Thumbs.db", b"\0");
  }

  #[tokio::test]
  async fn test_folder_sync_counts_every_entry() {
    let ctx = PipelineTestContext::new();
    seed(&ctx);
    let root = ctx.input_dir.path().join("docs");

    let snap = ctx.run(JobKind::FolderSync, &root).await;
    assert_eq!(snap.status, JobStatus::Completed);
    // readme.md, meeting.txt, todo.txt, cat.png
    assert_eq!(snap.total, 4);
    // setup.exe, .DS_Store, Thumbs.db
    assert_eq!(snap.skipped, 3);
    // todo.txt is below min_text_chars
    assert_eq!(snap.indexed, 3);
    assert_eq!(snap.failed, 1);
    assert!(snap.errors[0].starts_with("notes/todo.txt: text too short"));
    assert_eq!(snap.images, 0);
    assert_accounted(&snap);

    let root_str = root.to_string_lossy();
    let image = ctx.engine.get(&doc_id(&root_str, "photos/cat.png")).unwrap();
    assert_eq!(image["content"], "Image file: cat.png");
    assert_eq!(image["file_type"], ".png");
    assert_eq!(image["source"], "folder");
    assert_eq!(image["has_images"], false);

    let readme = ctx.engine.get(&doc_id(&root_str, "readme.md")).unwrap();
    assert_eq!(readme["filename"], "readme.md");
    assert_eq!(readme["folder_root"], root_str.to_string());
    assert_eq!(readme["file_path"], root.join("readme.md").to_string_lossy().into_owned());
  }

  #[tokio::test]
  async fn test_resync_produces_same_ids() {
    let ctx = PipelineTestContext::new();
    seed(&ctx);
    let root = ctx.input_dir.path().join("docs");

    ctx.run(JobKind::FolderSync, &root).await;
    let first: BTreeSet<String> = ctx.engine.ids().into_iter().collect();
    let snap = ctx.run(JobKind::FolderSync, &root).await;
    let second: BTreeSet<String> = ctx.engine.ids().into_iter().collect();

    assert_eq!(snap.indexed, 3);
    assert_eq!(first, second);
    assert_eq!(ctx.engine.len(), 3);
  }

  #[tokio::test]
  async fn test_unextractable_file_is_failed_not_fatal() {
    let mut ctx = PipelineTestContext::new();
    ctx.config.extractor.command = "/nonexistent/doc_extractor".to_string();
    ctx.write_input("docs/report.pdf", b"%PDF-1.4");
    ctx.write_input("docs/summary.txt", b"Summary of the quarterly report");
    let root = ctx.input_dir.path().join("docs");

    let snap = ctx.run(JobKind::FolderSync, &root).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.indexed, 1);
    assert_eq!(snap.failed, 1);
    assert!(snap.errors[0].starts_with("report.pdf: Could not run extractor"));
    assert_accounted(&snap);
  }

  #[tokio::test]
  async fn test_missing_folder_fails() {
    let ctx = PipelineTestContext::new();
    let snap = ctx.run(JobKind::FolderSync, &ctx.input_dir.path().join("absent")).await;
    assert_eq!(snap.status, JobStatus::Failed);
    assert!(snap.fatal_error.unwrap().starts_with("Target not found"));
    assert_eq!(snap.total, 0);
  }

  #[tokio::test]
  async fn test_batches_follow_monitor_growth() {
    let ctx = PipelineTestContext::new();
    for n in 0..20 {
      ctx.write_input(&format!("docs/file{n:02}.txt"), format!("Document number {n} body").as_bytes());
    }
    let root = ctx.input_dir.path().join("docs");

    let snap = ctx.run(JobKind::FolderSync, &root).await;
    assert_eq!(snap.indexed, 20);

    // Low pressure grows the batch by one per record from 3 up to 8
    let sizes = ctx.engine.batch_sizes();
    assert!(sizes.iter().all(|&s| s <= 8), "{sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), 20);
    assert_eq!(snap.monitor.unwrap().final_batch_size, 8);
  }
}
