use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{EngineError, SearchEngine, TaskId};
use crate::domain::{
  config::EngineConfig,
  document::{ImagePatch, IndexDocument},
};

/// Meilisearch over its HTTP API
#[derive(Debug, Clone)]
pub struct MeilisearchEngine {
  client: reqwest::Client,
  base_url: String,
  index: String,
  api_key: Option<String>,
  poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueuedTask {
  task_uid: u64,
}

#[derive(Debug, Deserialize)]
struct TaskView {
  status: TaskStatus,
  #[serde(default)]
  error: Option<TaskErrorView>,
}

#[derive(Debug, Deserialize)]
struct TaskErrorView {
  message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaskStatus {
  Enqueued,
  Processing,
  Succeeded,
  Failed,
  Canceled,
}

impl MeilisearchEngine {
  pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
    let base_url = config.url.trim_end_matches('/').to_string();
    if base_url.is_empty() {
      return Err(EngineError::InvalidConfig("engine.url is empty".to_string()));
    }
    if config.index.trim().is_empty() {
      return Err(EngineError::InvalidConfig("engine.index is empty".to_string()));
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
      .build()?;
    let api_key = config.resolved_api_key();

    info!(
      base_url,
      index = %config.index,
      authenticated = api_key.is_some(),
      "Meilisearch engine initialized"
    );

    Ok(Self {
      client,
      base_url,
      index: config.index.clone(),
      api_key,
      poll_interval: Duration::from_millis(config.task_poll_ms.max(1)),
    })
  }

  fn documents_url(&self) -> String {
    format!("{}/indexes/{}/documents?primaryKey=id", self.base_url, self.index)
  }

  fn task_url(&self, task: TaskId) -> String {
    format!("{}/tasks/{}", self.base_url, task.0)
  }

  fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.api_key {
      Some(key) => builder.bearer_auth(key),
      None => builder,
    }
  }

  async fn enqueue<T: Serialize + Sync>(&self, method: Method, body: &[T]) -> Result<TaskId, EngineError> {
    let start = Instant::now();
    let response = self.request(method.clone(), self.documents_url()).json(body).send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let message = response.text().await.unwrap_or_default();
      warn!(%status, %method, count = body.len(), "Meilisearch rejected document write");
      return Err(EngineError::Api {
        status: status.as_u16(),
        message,
      });
    }

    let enqueued: EnqueuedTask = response.json().await?;
    trace!(
      task = enqueued.task_uid,
      %method,
      count = body.len(),
      elapsed_ms = start.elapsed().as_millis() as u64,
      "Document write enqueued"
    );
    Ok(TaskId(enqueued.task_uid))
  }

  async fn task_status(&self, task: TaskId) -> Result<TaskView, EngineError> {
    let response = self.request(Method::GET, self.task_url(task)).send().await?;
    if !response.status().is_success() {
      let status = response.status();
      let message = response.text().await.unwrap_or_default();
      return Err(EngineError::Api {
        status: status.as_u16(),
        message,
      });
    }
    Ok(response.json().await?)
  }
}

#[async_trait]
impl SearchEngine for MeilisearchEngine {
  fn name(&self) -> &str {
    "meilisearch"
  }

  async fn add_documents(&self, documents: &[IndexDocument]) -> Result<TaskId, EngineError> {
    self.enqueue(Method::POST, documents).await
  }

  async fn update_documents(&self, patches: &[ImagePatch]) -> Result<TaskId, EngineError> {
    self.enqueue(Method::PUT, patches).await
  }

  async fn wait_for_task(&self, task: TaskId, timeout: Duration) -> Result<(), EngineError> {
    let start = Instant::now();
    let poll = async {
      loop {
        let view = self.task_status(task).await?;
        match view.status {
          TaskStatus::Succeeded => return Ok(()),
          TaskStatus::Failed | TaskStatus::Canceled => {
            let message = view
              .error
              .map(|e| e.message)
              .unwrap_or_else(|| format!("task {:?}", view.status).to_lowercase());
            return Err(EngineError::TaskFailed { task: task.0, message });
          }
          TaskStatus::Enqueued | TaskStatus::Processing => tokio::time::sleep(self.poll_interval).await,
        }
      }
    };

    let result = tokio::time::timeout(timeout, poll)
      .await
      .map_err(|_| EngineError::Timeout { task: task.0, timeout })?;
    debug!(task = task.0, elapsed_ms = start.elapsed().as_millis() as u64, "Engine task finished");
    result
  }
}
