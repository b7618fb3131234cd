use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use super::types::GenerationJob;
use super::worker::GenerationWorker;

const QUEUE_DEPTH: usize = 256;

/// Bridges the HTTP handlers to the detached workers: handlers only enqueue
/// and return, the dispatch loop spawns one worker task per job. Queued and
/// in-flight jobs are process-lifetime only; a restart loses them.
pub struct TaskScheduler {
    tx: mpsc::Sender<GenerationJob>,
    rx: Mutex<Option<mpsc::Receiver<GenerationJob>>>,
    worker: Arc<GenerationWorker>,
}

impl TaskScheduler {
    pub fn new(worker: Arc<GenerationWorker>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            worker,
        }
    }

    /// Enqueue a job. Returns once the job is queued, never waits for the
    /// generation itself.
    pub async fn submit(&self, job: GenerationJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow!("scheduler queue closed"))
    }

    pub async fn run(&self) -> Result<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("scheduler is already running"))?;

        while let Some(job) = rx.recv().await {
            info!("dispatching task {}", job.task_id);
            let worker = self.worker.clone();
            tokio::spawn(async move {
                worker.run(job).await;
            });
        }
        Ok(())
    }
}
