//! Search engine seam.
//!
//! Every write to the index is an asynchronous task on the engine side:
//! `add_documents` / `update_documents` enqueue work and return a [`TaskId`],
//! and [`SearchEngine::wait_for_task`] blocks (bounded) until the engine
//! reports the task finished.

mod meilisearch;
#[cfg(test)]
mod memory;

use std::{sync::Arc, time::Duration};

pub use meilisearch::MeilisearchEngine;
#[cfg(test)]
pub use memory::MemoryEngine;
use serde::{Deserialize, Serialize};

use crate::domain::{
  config::EngineConfig,
  document::{ImagePatch, IndexDocument},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

#[async_trait::async_trait]
pub trait SearchEngine: Send + Sync {
  fn name(&self) -> &str;

  /// Add or replace whole documents (upsert by id)
  async fn add_documents(&self, documents: &[IndexDocument]) -> Result<TaskId, EngineError>;

  /// Merge the given fields into existing documents
  async fn update_documents(&self, patches: &[ImagePatch]) -> Result<TaskId, EngineError>;

  /// Wait until the task succeeds, fails, or `timeout` elapses
  async fn wait_for_task(&self, task: TaskId, timeout: Duration) -> Result<(), EngineError>;
}

impl dyn SearchEngine {
  pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn SearchEngine>, EngineError> {
    Ok(Arc::new(MeilisearchEngine::new(config)?))
  }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Engine returned {status}: {message}")]
  Api { status: u16, message: String },
  #[error("Task {task} failed: {message}")]
  TaskFailed { task: u64, message: String },
  #[error("Task {task} did not finish within {timeout:?}")]
  Timeout { task: u64, timeout: Duration },
  #[error("Invalid engine config: {0}")]
  InvalidConfig(String),
}
