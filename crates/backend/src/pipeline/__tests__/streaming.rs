//! Archive-index jobs driven by the streaming extractor.
//!
//! The extractor is a generated `sh` script that replays canned JSON lines.

#[cfg(all(test, unix))]
mod tests {
  use std::fs;

  use tokio_util::sync::CancellationToken;

  use crate::{
    domain::{
      document::doc_id,
      job::{JobKind, JobStatus},
    },
    pipeline::{
      INTERRUPTED,
      __tests__::helpers::{PipelineTestContext, assert_accounted, record_line},
    },
  };

  fn article(n: usize) -> String {
    record_line(&format!("A/Article_{n}"), &format!("Body of article {n} with enough text"), None)
  }

  #[tokio::test]
  async fn test_clean_run_indexes_every_record() {
    let mut ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..7).map(article).collect();
    ctx.streaming_extractor(&lines, 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 7);
    assert_eq!(snap.indexed, 7);
    assert!(snap.errors.is_empty(), "{:?}", snap.errors);
    assert_accounted(&snap);

    let root = archive.to_string_lossy();
    let stored = ctx.engine.get(&doc_id(&root, "A/Article_3")).unwrap();
    assert_eq!(stored["filename"], "Article 3");
    assert_eq!(stored["file_type"], ".zim");
    assert_eq!(stored["source"], "zim");
    assert_eq!(stored["zim_article_url"], "A/Article_3");
    assert_eq!(stored["file_path"], format!("zim://{root}#A/Article_3"));
    assert!(snap.monitor.is_some());
  }

  #[tokio::test]
  async fn test_nonzero_exit_after_records_completes() {
    let mut ctx = PipelineTestContext::new();
    ctx.streaming_extractor(&[article(1), article(2)], 3);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.indexed, 2);
    assert_eq!(snap.fatal_error, None);
    assert!(snap.errors.iter().any(|e| e.contains("exited with code 3 after 2 records")));
    assert_accounted(&snap);
  }

  #[tokio::test]
  async fn test_nonzero_exit_without_records_fails() {
    let mut ctx = PipelineTestContext::new();
    ctx.streaming_extractor(&["not json at all".to_string()], 2);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.total, 0);
    let message = snap.fatal_error.unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("code 2"), "{message}");
  }

  #[tokio::test]
  async fn test_malformed_lines_are_skipped() {
    let mut ctx = PipelineTestContext::new();
    ctx.streaming_extractor(&[article(1), "{broken".to_string(), article(2)], 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 2);
    assert_eq!(snap.indexed, 2);
  }

  #[tokio::test]
  async fn test_short_text_counts_as_failed() {
    let mut ctx = PipelineTestContext::new();
    ctx.streaming_extractor(&[article(1), record_line("A/Stub", "  tiny ", None)], 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.indexed, 1);
    assert_eq!(snap.failed, 1);
    assert!(snap.errors[0].starts_with("A/Stub: text too short"));
    assert_accounted(&snap);
  }

  #[tokio::test]
  async fn test_failed_commit_is_counted_and_job_completes() {
    let mut ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..6).map(article).collect();
    ctx.streaming_extractor(&lines, 0);
    let archive = ctx.zim_archive("wiki.zim");
    // Dead zone: the batch size stays at batch_default (3)
    ctx.probe.set(0.55, 0.1);
    ctx.engine.fail_next_adds(1);

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.failed, 3);
    assert_eq!(snap.indexed, 3);
    assert_eq!(snap.errors.len(), 1);
    assert_accounted(&snap);
  }

  #[tokio::test]
  async fn test_failed_commit_leaves_no_image_only_document() {
    let mut ctx = PipelineTestContext::new();
    // Critical pressure defers the image; the only batch is then rejected
    ctx.probe.set(0.95, 1.0);
    ctx.engine.fail_next_adds(1);
    let rendered = ctx.rendered_thumbnails("owl");
    ctx.streaming_extractor(&[record_line("A/Owl", "Owls hunt mostly at night", Some(&rendered))], 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.indexed, 0);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.images, 0);
    assert_eq!(snap.images_failed, 1);
    assert_eq!(snap.deferred, 0);
    assert_accounted(&snap);

    assert_eq!(ctx.engine.len(), 0);
    assert_eq!(ctx.engine.update_calls(), 0);
    assert!(ctx.engine.get(&doc_id(&archive.to_string_lossy(), "A/Owl")).is_none());
  }

  #[tokio::test]
  async fn test_deferred_images_drain_mid_stream_once_pressure_drops() {
    let mut ctx = PipelineTestContext::new();
    // Fixed batch of 2; a final drain would need one update per patch
    ctx.config.monitor.batch_min = 2;
    ctx.config.monitor.batch_default = 2;
    ctx.config.monitor.batch_max = 2;
    ctx.config.deferred.patch_batch = 1;
    ctx.probe.set(0.95, 0.1);

    let images: Vec<String> = (0..4)
      .map(|n| {
        let rendered = ctx.rendered_thumbnails(&format!("pic{n}"));
        record_line(&format!("A/Picture_{n}"), "An article that carries a picture", Some(&rendered))
      })
      .collect();
    let plain: Vec<String> = (0..2).map(article).collect();
    let first = ctx.write_input("images.jsonl", format!("{}\n", images.join("\n")).as_bytes());
    let second = ctx.write_input("plain.jsonl", plain.join("\n").as_bytes());
    // The pause keeps the extractor streaming while pressure is relieved
    ctx.extractor_script(&format!(
      "cat '{}'\nsleep 1\ncat '{}'\nexit 0\n",
      first.display(),
      second.display()
    ));
    let archive = ctx.zim_archive("wiki.zim");

    let probe = ctx.probe.clone();
    let relief = tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(300)).await;
      probe.set(0.3, 0.1);
    });

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    relief.await.unwrap();

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.indexed, 6);
    assert_eq!(snap.images, 4);
    assert_eq!(snap.images_failed, 0);
    assert_eq!(snap.deferred, 0);
    assert_accounted(&snap);
    // All four patches went out together from the mid-stream drain
    assert_eq!(ctx.engine.update_calls(), 1);

    let root = archive.to_string_lossy();
    for n in 0..4 {
      let stored = ctx.engine.get(&doc_id(&root, &format!("A/Picture_{n}"))).unwrap();
      assert_eq!(stored["has_images"], true, "picture {n} missing");
      assert_eq!(stored["content"], "An article that carries a picture");
    }
  }

  #[tokio::test]
  async fn test_thumbnails_adopted_inline_when_memory_is_low() {
    let mut ctx = PipelineTestContext::new();
    let rendered = ctx.rendered_thumbnails("cat");
    ctx.streaming_extractor(&[record_line("A/Cat", "Cats are small carnivores", Some(&rendered))], 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.images, 1);
    assert_eq!(snap.images_failed, 0);

    let id = doc_id(&archive.to_string_lossy(), "A/Cat");
    let stored = ctx.engine.get(&id).unwrap();
    assert_eq!(stored["has_images"], true);
    assert_eq!(stored["first_image"], format!("/static/thumbnails/{id}/{id}_thumb_0_large.jpg"));
    assert!(ctx.thumbnail_root().join(&id).join(format!("{id}_thumb_0_small.jpg")).is_file());
    // Patches are only needed for deferred adoption
    assert_eq!(ctx.engine.update_calls(), 0);
  }

  #[tokio::test]
  async fn test_ten_deferred_images_survive_cooldown_timeout() {
    let mut ctx = PipelineTestContext::new();
    // Critical pressure for the whole run: every image is deferred and the
    // final cooldown wait times out.
    ctx.probe.set(0.95, 1.0);
    let lines: Vec<String> = (0..10)
      .map(|n| {
        let rendered = ctx.rendered_thumbnails(&format!("img{n}"));
        record_line(&format!("A/Image_{n}"), "An article that carries an image", Some(&rendered))
      })
      .collect();
    ctx.streaming_extractor(&lines, 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.indexed, 10);
    assert_eq!(snap.images + snap.images_failed, 10);
    assert_eq!(snap.images, 10);
    assert_accounted(&snap);

    let monitor = snap.monitor.unwrap();
    assert_eq!(monitor.final_batch_size, 2);
    assert!(monitor.cooldowns > 0);

    let root = archive.to_string_lossy();
    for n in 0..10 {
      let stored = ctx.engine.get(&doc_id(&root, &format!("A/Image_{n}"))).unwrap();
      assert_eq!(stored["has_images"], true, "image {n} missing");
      assert_eq!(stored["content"], "An article that carries an image");
    }
  }

  #[tokio::test]
  async fn test_image_skip_tags_are_counted() {
    let mut ctx = PipelineTestContext::new();
    let mut icon: serde_json::Value = serde_json::from_str(&article(1)).unwrap();
    icon["image_skipped"] = "icon".into();
    let mut missing: serde_json::Value = serde_json::from_str(&article(2)).unwrap();
    missing["image_skipped"] = "not_found".into();
    ctx.streaming_extractor(&[icon.to_string(), missing.to_string(), article(3)], 0);
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.images_skipped_icon, 1);
    assert_eq!(snap.images_skipped_not_found, 1);
    assert_eq!(snap.indexed, 3);
  }

  #[tokio::test]
  async fn test_reindexing_same_archive_upserts() {
    let mut ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..5).map(article).collect();
    ctx.streaming_extractor(&lines, 0);
    let archive = ctx.zim_archive("wiki.zim");

    ctx.run(JobKind::ArchiveIndex, &archive).await;
    let first = ctx.engine.ids();
    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;

    assert_eq!(snap.indexed, 5);
    assert_eq!(ctx.engine.ids(), first);
    assert_eq!(ctx.engine.len(), 5);
  }

  #[tokio::test]
  async fn test_staging_directory_is_removed() {
    let mut ctx = PipelineTestContext::new();
    ctx.streaming_extractor(&[article(1)], 0);
    let archive = ctx.zim_archive("wiki.zim");

    ctx.run(JobKind::ArchiveIndex, &archive).await;
    let leftovers = fs::read_dir(ctx.staging_root()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
  }

  #[tokio::test]
  async fn test_missing_extractor_is_fatal() {
    let mut ctx = PipelineTestContext::new();
    ctx.config.extractor.command = "/nonexistent/doc_extractor".to_string();
    let archive = ctx.zim_archive("wiki.zim");

    let snap = ctx.run(JobKind::ArchiveIndex, &archive).await;
    assert_eq!(snap.status, JobStatus::Failed);
    assert!(snap.fatal_error.unwrap().contains("/nonexistent/doc_extractor"));
  }

  #[tokio::test]
  async fn test_missing_and_unsupported_targets_fail() {
    let ctx = PipelineTestContext::new();

    let missing = ctx.run(JobKind::ArchiveIndex, &ctx.input_dir.path().join("gone.zim")).await;
    assert_eq!(missing.status, JobStatus::Failed);
    assert!(missing.fatal_error.unwrap().starts_with("Target not found"));

    let rar = ctx.write_input("bundle.rar", b"Rar!");
    let unsupported = ctx.run(JobKind::ArchiveIndex, &rar).await;
    assert_eq!(unsupported.status, JobStatus::Failed);
    assert!(unsupported.fatal_error.unwrap().starts_with("Unsupported archive type"));
  }

  #[tokio::test]
  async fn test_cancelled_job_fails_as_interrupted() {
    let mut ctx = PipelineTestContext::new();
    let lines: Vec<String> = (0..5).map(article).collect();
    ctx.streaming_extractor(&lines, 0);
    let archive = ctx.zim_archive("wiki.zim");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let snap = ctx.run_with(JobKind::ArchiveIndex, &archive, cancel).await;
    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.fatal_error.as_deref(), Some(INTERRUPTED));
    assert_accounted(&snap);
  }
}
