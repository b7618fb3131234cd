use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::provider::{JobRequest, JobState, ProviderError, QualityMode, VideoProvider};
use crate::task::store::TaskStore;
use crate::task::types::{
    expected_job_duration, GenerationJob, Task, TaskStatus, MAX_CONSECUTIVE_POLL_ERRORS,
    MAX_POLL_ATTEMPTS, POLL_INTERVAL,
};
use crate::utils::RetryPolicy;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_consecutive_errors: u32,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
            max_consecutive_errors: MAX_CONSECUTIVE_POLL_ERRORS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Drives one task from `PROCESSING` to a terminal state against the
/// provider, detached from the request that spawned it. Errors never
/// propagate out of `run`; they are only observable through the task record.
pub struct GenerationWorker {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn VideoProvider>,
    config: WorkerConfig,
}

/// Translate a queued job into the provider request. Matching the original
/// resolution forces the fast mode: the output must not be upscaled or
/// reprocessed.
pub fn build_job_request(job: &GenerationJob) -> JobRequest {
    let quality = if job.match_original_resolution || !job.enable_quality_mode {
        QualityMode::Speed
    } else {
        QualityMode::Quality
    };
    let prompt = Some(job.prompt.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    JobRequest {
        image_url: job.image_url.clone(),
        size: job.video_size.clone(),
        duration: job.duration,
        fps: job.fps,
        quality,
        prompt,
        seed: job.seed,
    }
}

/// Wall-clock progress estimate: 20% after submission, ramping toward 90%
/// over the expected job duration. Never reaches 100 before the terminal
/// success write.
fn estimate_progress(start_time: DateTime<Utc>, expected: Duration) -> u8 {
    let elapsed_ms = (Utc::now() - start_time).num_milliseconds().max(0) as f64;
    let expected_ms = expected.as_millis() as f64;
    let estimate = 20.0 + (elapsed_ms / expected_ms) * 70.0;
    estimate.min(90.0).round() as u8
}

impl GenerationWorker {
    pub fn new(store: Arc<dyn TaskStore>, provider: Arc<dyn VideoProvider>) -> Self {
        Self::with_config(store, provider, WorkerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn VideoProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub async fn run(&self, job: GenerationJob) {
        info!("starting generation for task {}", job.task_id);

        if let Err(e) = self
            .config
            .retry
            .run("provider init", || self.provider.init(), ProviderError::is_retryable)
            .await
        {
            error!("provider init failed for task {}: {}", job.task_id, e);
            self.fail(
                &job.task_id,
                "Failed to connect to the video service. Please check your connection and try again.",
            )
            .await;
            return;
        }
        self.update_progress(&job.task_id, 10).await;

        let request = build_job_request(&job);
        let provider_job_id = match self
            .config
            .retry
            .run(
                "job submission",
                || self.provider.create_job(&request),
                ProviderError::is_retryable,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!("job submission failed for task {}: {}", job.task_id, e);
                self.fail(&job.task_id, &format!("Video service error: {}", e))
                    .await;
                return;
            }
        };
        info!("task {} submitted as provider job {}", job.task_id, provider_job_id);
        self.update_progress(&job.task_id, 20).await;

        self.poll_until_done(&job, &provider_job_id).await;
    }

    async fn poll_until_done(&self, job: &GenerationJob, provider_job_id: &str) {
        let expected = expected_job_duration(job.duration);
        let mut attempts = 0;
        let mut consecutive_errors = 0;

        while attempts < self.config.max_poll_attempts {
            // cancellation is cooperative: checked before every provider call
            let start_time = match self.store.get(&job.task_id).await {
                Ok(Some(stored)) => {
                    if stored.task.status == TaskStatus::Cancelled {
                        info!("task {} cancelled by user, stopping worker", job.task_id);
                        return;
                    }
                    stored.task.start_time
                }
                Ok(None) => {
                    warn!("task {} vanished from the store, stopping worker", job.task_id);
                    return;
                }
                Err(e) => {
                    error!("store read failed for task {}: {}", job.task_id, e);
                    return;
                }
            };

            let poll = match self.provider.poll_job(provider_job_id).await {
                Ok(poll) => {
                    consecutive_errors = 0;
                    poll
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "poll error for task {} ({}/{}): {}",
                        job.task_id, consecutive_errors, self.config.max_consecutive_errors, e
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        self.fail(
                            &job.task_id,
                            "Lost connection to the video generation service. Please try again.",
                        )
                        .await;
                        return;
                    }
                    sleep(self.config.poll_interval).await;
                    attempts += 1;
                    continue;
                }
            };
            attempts += 1;

            self.update_progress(&job.task_id, estimate_progress(start_time, expected))
                .await;

            match poll.state {
                JobState::Success => {
                    match poll.video_url {
                        Some(url) => {
                            info!("task {} succeeded: {}", job.task_id, url);
                            self.succeed(&job.task_id, url).await;
                        }
                        None => {
                            error!(
                                "provider reported success without a result for task {}",
                                job.task_id
                            );
                            self.fail(&job.task_id, "Generation completed but no video was returned.")
                                .await;
                        }
                    }
                    return;
                }
                JobState::Fail => {
                    // raw detail stays in the log; the user gets a generic message
                    error!(
                        "provider reported failure for task {}: {}",
                        job.task_id,
                        poll.detail.as_deref().unwrap_or("no detail")
                    );
                    self.fail(
                        &job.task_id,
                        "Video generation failed. Please try with a different image.",
                    )
                    .await;
                    return;
                }
                JobState::Processing => sleep(self.config.poll_interval).await,
            }
        }

        self.fail(&job.task_id, "Video generation timed out. Please try again.")
            .await;
    }

    /// Advisory progress write. Skipped when the task left `PROCESSING`, when
    /// it would move progress backwards, or when a concurrent writer won the
    /// version race.
    async fn update_progress(&self, task_id: &str, progress: u8) {
        let stored = match self.store.get(task_id).await {
            Ok(Some(stored)) => stored,
            _ => return,
        };
        if stored.task.status != TaskStatus::Processing || progress <= stored.task.progress {
            return;
        }
        let mut task = stored.task;
        task.progress = progress;
        if let Err(e) = self.store.put_if_version(task_id, task, stored.version).await {
            warn!("progress write failed for task {}: {}", task_id, e);
        }
    }

    async fn succeed(&self, task_id: &str, video_url: String) {
        self.finish(task_id, |task| {
            let mut task = task.clone();
            task.status = TaskStatus::Success;
            task.progress = 100;
            task.video_url = Some(video_url.clone());
            task.error = None;
            task
        })
        .await;
    }

    async fn fail(&self, task_id: &str, message: &str) {
        self.finish(task_id, |task| {
            let mut task = task.clone();
            task.status = TaskStatus::Fail;
            task.error = Some(message.to_string());
            task
        })
        .await;
    }

    /// Terminal write: re-read, give way if cancellation (or any other
    /// terminal write) landed first, then compare-and-set. A version conflict
    /// means another writer slipped in between the read and the write, so the
    /// whole read-modify-write is retried.
    async fn finish<F>(&self, task_id: &str, make: F)
    where
        F: Fn(&Task) -> Task,
    {
        loop {
            let stored = match self.store.get(task_id).await {
                Ok(Some(stored)) => stored,
                Ok(None) => return,
                Err(e) => {
                    error!("store read failed for task {}: {}", task_id, e);
                    return;
                }
            };
            if stored.task.status.is_terminal() {
                info!(
                    "task {} already {}, dropping terminal write",
                    task_id, stored.task.status
                );
                return;
            }
            let task = make(&stored.task);
            match self.store.put_if_version(task_id, task, stored.version).await {
                Ok(true) => return,
                Ok(false) => continue,
                Err(e) => {
                    error!("terminal write failed for task {}: {}", task_id, e);
                    return;
                }
            }
        }
    }
}
