use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::types::Task;

/// A task snapshot together with the store version it was read at. Writers
/// hand the version back so the store can reject stale writes.
#[derive(Debug, Clone)]
pub struct StoredTask {
    pub version: u64,
    pub task: Task,
}

/// Single source of truth for task state, addressable by task id and shared
/// by the submission endpoint, the worker, and the status/cancel endpoints.
///
/// "Not found" is signalled as `None`, never as an error. `put` is
/// last-writer-wins; `put_if_version` only lands when the record is still at
/// the version the caller read, which is what makes the cancel-vs-terminal
/// race deterministic.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn get(&self, task_id: &str) -> Result<Option<StoredTask>>;
    async fn has(&self, task_id: &str) -> Result<bool>;
    async fn put(&self, task_id: &str, task: Task) -> Result<u64>;
    async fn put_if_version(&self, task_id: &str, task: Task, expected: u64) -> Result<bool>;
}

/// Process-lifetime map. Tasks are never deleted; the store is discarded with
/// the process, which also means task state is not shared across instances —
/// this design is single-instance only.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, StoredTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<StoredTask>> {
        let tasks = self.tasks.read().map_err(|_| anyhow!("task store lock poisoned"))?;
        Ok(tasks.get(task_id).cloned())
    }

    async fn has(&self, task_id: &str) -> Result<bool> {
        let tasks = self.tasks.read().map_err(|_| anyhow!("task store lock poisoned"))?;
        Ok(tasks.contains_key(task_id))
    }

    async fn put(&self, task_id: &str, task: Task) -> Result<u64> {
        let mut tasks = self.tasks.write().map_err(|_| anyhow!("task store lock poisoned"))?;
        let version = tasks.get(task_id).map(|s| s.version + 1).unwrap_or(1);
        tasks.insert(task_id.to_string(), StoredTask { version, task });
        Ok(version)
    }

    async fn put_if_version(&self, task_id: &str, task: Task, expected: u64) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(|_| anyhow!("task store lock poisoned"))?;
        match tasks.get(task_id) {
            Some(stored) if stored.version == expected => {
                tasks.insert(
                    task_id.to_string(),
                    StoredTask {
                        version: expected + 1,
                        task,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
