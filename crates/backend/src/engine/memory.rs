//! In-process engine for pipeline tests.

use std::{
  sync::{
    Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use super::{EngineError, SearchEngine, TaskId};
use crate::domain::document::{ImagePatch, IndexDocument};

/// Stores documents as JSON objects keyed by id. Adds replace, updates merge.
#[derive(Default)]
pub struct MemoryEngine {
  documents: DashMap<String, Map<String, Value>>,
  next_task: AtomicU64,
  /// Number of upcoming add calls to reject
  fail_adds: AtomicUsize,
  /// Number of upcoming update calls to reject
  fail_updates: AtomicUsize,
  /// Tasks that never finish, to exercise commit timeouts
  stalled: Mutex<Vec<TaskId>>,
  stall_next_adds: AtomicUsize,
  add_calls: AtomicUsize,
  update_calls: AtomicUsize,
  batch_sizes: Mutex<Vec<usize>>,
}

impl MemoryEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_next_adds(&self, count: usize) {
    self.fail_adds.store(count, Ordering::SeqCst);
  }

  pub fn fail_next_updates(&self, count: usize) {
    self.fail_updates.store(count, Ordering::SeqCst);
  }

  pub fn stall_next_adds(&self, count: usize) {
    self.stall_next_adds.store(count, Ordering::SeqCst);
  }

  pub fn len(&self) -> usize {
    self.documents.len()
  }

  pub fn get(&self, id: &str) -> Option<Map<String, Value>> {
    self.documents.get(id).map(|d| d.clone())
  }

  pub fn ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
    ids.sort();
    ids
  }

  pub fn add_calls(&self) -> usize {
    self.add_calls.load(Ordering::SeqCst)
  }

  pub fn update_calls(&self) -> usize {
    self.update_calls.load(Ordering::SeqCst)
  }

  /// Sizes of every add batch received, in order
  pub fn batch_sizes(&self) -> Vec<usize> {
    self.batch_sizes.lock().unwrap().clone()
  }

  fn take_one(counter: &AtomicUsize) -> bool {
    counter
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }

  fn task(&self) -> TaskId {
    TaskId(self.next_task.fetch_add(1, Ordering::SeqCst))
  }
}

fn as_object<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>, EngineError> {
  match serde_json::to_value(value) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(EngineError::Api {
      status: 400,
      message: "document is not an object".to_string(),
    }),
    Err(e) => Err(EngineError::Api {
      status: 400,
      message: e.to_string(),
    }),
  }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
  fn name(&self) -> &str {
    "memory"
  }

  async fn add_documents(&self, documents: &[IndexDocument]) -> Result<TaskId, EngineError> {
    self.add_calls.fetch_add(1, Ordering::SeqCst);
    self.batch_sizes.lock().unwrap().push(documents.len());
    if Self::take_one(&self.fail_adds) {
      return Err(EngineError::Api {
        status: 503,
        message: "injected add failure".to_string(),
      });
    }

    let task = self.task();
    if Self::take_one(&self.stall_next_adds) {
      self.stalled.lock().unwrap().push(task);
      return Ok(task);
    }

    for document in documents {
      self.documents.insert(document.id.clone(), as_object(document)?);
    }
    Ok(task)
  }

  async fn update_documents(&self, patches: &[ImagePatch]) -> Result<TaskId, EngineError> {
    self.update_calls.fetch_add(1, Ordering::SeqCst);
    if Self::take_one(&self.fail_updates) {
      return Err(EngineError::Api {
        status: 503,
        message: "injected update failure".to_string(),
      });
    }

    for patch in patches {
      let fields = as_object(patch)?;
      self.documents.entry(patch.id.clone()).or_default().extend(fields);
    }
    Ok(self.task())
  }

  async fn wait_for_task(&self, task: TaskId, timeout: Duration) -> Result<(), EngineError> {
    let stalled = self.stalled.lock().unwrap().contains(&task);
    if stalled {
      tokio::time::sleep(timeout).await;
      return Err(EngineError::Timeout { task: task.0, timeout });
    }
    Ok(())
  }
}
