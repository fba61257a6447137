//! Single-file text extraction for the folder and archive producers.

use std::{
  path::{Path, PathBuf},
  process::Stdio,
  time::Duration,
};

use serde::Deserialize;
use tokio::process::Command;
use tracing::trace;

use crate::domain::config::ExtractorConfig;

const NATIVE_TEXT: &[&str] = &["txt", "md"];
const IMAGE_TYPES: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
  #[error("Could not run extractor `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Extractor timed out after {0:?}")]
  Timeout(Duration),
  #[error("Extractor exited with code {code:?}: {stderr}")]
  Exit { code: Option<i32>, stderr: String },
  #[error("Unreadable extractor output: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("Extraction failed: {0}")]
  Unsuccessful(String),
  #[error("No text extracted")]
  Empty,
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct SingleFileOutput {
  #[serde(default)]
  success: bool,
  #[serde(default)]
  text: String,
  #[serde(default)]
  error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TextExtractor {
  command: String,
  args: Vec<String>,
  timeout: Duration,
}

impl TextExtractor {
  pub fn from_config(config: &ExtractorConfig) -> Self {
    Self {
      command: config.command.clone(),
      args: config.args.clone(),
      timeout: Duration::from_secs(config.single_file_timeout_secs.max(1)),
    }
  }

  /// Extract text from `path`, dispatching on the lowercase extension `ext`.
  pub async fn extract(&self, path: &Path, ext: &str) -> Result<String, ExtractError> {
    let text = if NATIVE_TEXT.contains(&ext) {
      let bytes = tokio::fs::read(path).await?;
      String::from_utf8_lossy(&bytes).into_owned()
    } else if IMAGE_TYPES.contains(&ext) {
      let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
      format!("Image file: {name}")
    } else {
      self.run(path).await?
    };

    if text.trim().is_empty() {
      return Err(ExtractError::Empty);
    }
    Ok(text)
  }

  async fn run(&self, path: &Path) -> Result<String, ExtractError> {
    let mut command = Command::new(&self.command);
    command
      .args(&self.args)
      .arg(path)
      .arg("--text")
      .stdin(Stdio::null())
      .kill_on_drop(true);

    trace!(command = %self.command, path = %path.display(), "Running single-file extraction");
    let child = command.output();
    let output = match tokio::time::timeout(self.timeout, child).await {
      Ok(result) => result.map_err(|source| ExtractError::Spawn {
        command: self.command.clone(),
        source,
      })?,
      // Dropping the future kills the child
      Err(_) => return Err(ExtractError::Timeout(self.timeout)),
    };

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(ExtractError::Exit {
        code: output.status.code(),
        stderr: stderr.trim().chars().take(500).collect(),
      });
    }

    let parsed: SingleFileOutput = serde_json::from_slice(&output.stdout)?;
    if !parsed.success {
      return Err(ExtractError::Unsuccessful(
        parsed.error.unwrap_or_else(|| "unknown error".to_string()),
      ));
    }
    Ok(parsed.text)
  }
}

/// Scratch file path for an archive entry inside `dir`
pub fn scratch_path(dir: &Path, index: usize, ext: &str) -> PathBuf {
  if ext.is_empty() {
    dir.join(format!("entry-{index}"))
  } else {
    dir.join(format!("entry-{index}.{ext}"))
  }
}
