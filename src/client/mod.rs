//! Client-side companion to the generation endpoints: submission with
//! network-only retry, a fixed-interval status poller with its own
//! consecutive-error budget, best-effort cancel, and re-submission.

use serde::Deserialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::task::types::{TaskStatus, VideoSettings, CLIENT_MAX_CONSECUTIVE_ERRORS, POLL_INTERVAL};
use crate::utils::RetryPolicy;

#[derive(Debug)]
pub enum ClientError {
    /// Daily quota exhausted; never retried.
    UsageLimit {
        message: String,
        remaining: Option<u32>,
        total: Option<u32>,
    },
    /// Combined prompt over budget; never retried.
    PromptTooLong {
        message: String,
        current: Option<usize>,
        max: Option<usize>,
    },
    /// The generation itself failed server-side.
    Generation(String),
    /// Any other structured server response.
    Api { status: u16, message: String },
    /// Network-class failure talking to the server.
    Network(String),
    /// The status poller exceeded its consecutive-error budget.
    LostConnection,
}

impl ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::UsageLimit { message, .. } => write!(f, "{}", message),
            ClientError::PromptTooLong { message, .. } => write!(f, "{}", message),
            ClientError::Generation(message) => write!(f, "{}", message),
            ClientError::Api { status, message } => write!(f, "server error {}: {}", status, message),
            ClientError::Network(message) => write!(f, "network error: {}", message),
            ClientError::LostConnection => {
                write!(f, "Lost connection to server. Please check your connection and retry.")
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

/// One status snapshot as reported by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub image_data_url: String,
    pub prompt: String,
    pub settings: VideoSettings,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub poll_interval: Duration,
    pub max_consecutive_errors: u32,
    pub submit_retry: RetryPolicy,
    pub status_retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_consecutive_errors: CLIENT_MAX_CONSECUTIVE_ERRORS,
            submit_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10)),
            status_retry: RetryPolicy::new(2, Duration::from_millis(500), Duration::from_secs(3)),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponseWire {
    task_id: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponseWire {
    error: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    remaining: Option<u32>,
    total: Option<u32>,
    current_length: Option<usize>,
    max_length: Option<usize>,
}

#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_config(base_url, ClientConfig::default())
    }

    pub fn with_config(
        base_url: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    /// Submit a generation request. Network-class failures are retried with
    /// backoff; usage-limit and validation errors propagate immediately.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationHandle, ClientError> {
        let task_id = self
            .config
            .submit_retry
            .run("generation submit", || self.submit(&request), ClientError::is_retryable)
            .await?;
        info!("generation started, task {}", task_id);
        Ok(GenerationHandle {
            client: self.clone(),
            request,
            task_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn submit(&self, request: &GenerateRequest) -> Result<String, ClientError> {
        let settings = &request.settings;
        let mut form = reqwest::multipart::Form::new()
            .text("image", request.image_data_url.clone())
            .text("prompt", request.prompt.clone())
            .text("duration", settings.duration.to_string())
            .text("fps", settings.fps.to_string())
            .text("resolution", settings.resolution.clone())
            .text("quality", settings.quality.clone())
            .text("matchOriginalResolution", settings.match_original_resolution.to_string())
            .text("enableQualityMode", settings.enable_quality_mode.to_string());
        if let Some(seed) = settings.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(session_id) = &request.session_id {
            form = form.text("sessionId", session_id.clone());
        }
        if let Some(user_id) = &request.user_id {
            form = form.text("userId", user_id.clone());
        }

        let response = self
            .http
            .post(format!("{}/api/video/generate", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: GenerateResponseWire = response.json().await?;
            return Ok(body.task_id);
        }

        let body: ErrorResponseWire = response.json().await.unwrap_or_default();
        let message = body
            .error
            .unwrap_or_else(|| format!("Server error ({})", status.as_u16()));
        match body.kind.as_deref() {
            Some("USAGE_LIMIT") => Err(ClientError::UsageLimit {
                message,
                remaining: body.remaining,
                total: body.total,
            }),
            Some("PROMPT_TOO_LONG") => Err(ClientError::PromptTooLong {
                message,
                current: body.current_length,
                max: body.max_length,
            }),
            _ if status.as_u16() == 429 => Err(ClientError::UsageLimit {
                message,
                remaining: body.remaining,
                total: body.total,
            }),
            _ => Err(ClientError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    /// One status lookup, with a short transport-only retry of its own so a
    /// single blip does not count against the poller's error budget.
    pub async fn check_status(&self, task_id: &str) -> Result<TaskSnapshot, ClientError> {
        self.config
            .status_retry
            .run(
                "status check",
                || self.fetch_status(task_id),
                |e| matches!(e, ClientError::Network(_)),
            )
            .await
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskSnapshot, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/video/status/{}", self.base_url, task_id))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorResponseWire = response.json().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "Status check failed".to_string()),
            });
        }
        Ok(response.json().await?)
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/video/cancel/{}", self.base_url, task_id))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Api {
                status: response.status().as_u16(),
                message: "Cancel failed".to_string(),
            });
        }
        Ok(())
    }
}

/// A submitted generation. Poll with [`wait`], abort with [`cancel`], or
/// re-run the original request with [`resubmit`].
///
/// [`wait`]: GenerationHandle::wait
/// [`cancel`]: GenerationHandle::cancel
/// [`resubmit`]: GenerationHandle::resubmit
pub struct GenerationHandle {
    client: GenerationClient,
    request: GenerateRequest,
    task_id: String,
    cancelled: Arc<AtomicBool>,
}

impl GenerationHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Poll until the task is terminal. Resolves exactly once: `SUCCESS` and
    /// `CANCELLED` yield the final snapshot, `FAIL` becomes
    /// [`ClientError::Generation`], and too many consecutive poll failures
    /// become [`ClientError::LostConnection`].
    pub async fn wait(&self) -> Result<TaskSnapshot, ClientError> {
        self.wait_with(|_| {}).await
    }

    /// Like [`wait`](Self::wait), invoking `on_update` with every snapshot.
    pub async fn wait_with<F>(&self, mut on_update: F) -> Result<TaskSnapshot, ClientError>
    where
        F: FnMut(&TaskSnapshot),
    {
        let mut consecutive_errors = 0;
        let mut last_progress = 0;

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(TaskSnapshot {
                    status: TaskStatus::Cancelled,
                    progress: last_progress,
                    video_url: None,
                    error: None,
                });
            }

            sleep(self.client.config.poll_interval).await;

            let snapshot = match self.client.check_status(&self.task_id).await {
                Ok(snapshot) => {
                    consecutive_errors = 0;
                    snapshot
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "poll error for task {} ({}/{}): {}",
                        self.task_id,
                        consecutive_errors,
                        self.client.config.max_consecutive_errors,
                        e
                    );
                    if consecutive_errors >= self.client.config.max_consecutive_errors {
                        return Err(ClientError::LostConnection);
                    }
                    continue;
                }
            };

            last_progress = snapshot.progress;
            on_update(&snapshot);

            match snapshot.status {
                TaskStatus::Processing => {}
                TaskStatus::Success | TaskStatus::Cancelled => return Ok(snapshot),
                TaskStatus::Fail => {
                    return Err(ClientError::Generation(
                        snapshot
                            .error
                            .unwrap_or_else(|| "Generation failed".to_string()),
                    ))
                }
            }
        }
    }

    /// Best-effort cancel: the server call may fail without surfacing an
    /// error; the handle is marked cancelled locally either way and any
    /// in-flight [`wait`](Self::wait) stops at its next checkpoint.
    pub async fn cancel(&self) {
        if let Err(e) = self.client.cancel_task(&self.task_id).await {
            debug!("cancel call for task {} failed: {}", self.task_id, e);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Re-submit the original request as a fresh task.
    pub async fn resubmit(&self) -> Result<GenerationHandle, ClientError> {
        self.client.generate(self.request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media;
    use crate::provider::testing::MockProvider;
    use crate::task::store::{InMemoryTaskStore, TaskStore};
    use crate::task::worker::{GenerationWorker, WorkerConfig};
    use crate::task::TaskScheduler;
    use crate::usage::InMemoryUsageGate;
    use crate::AppContext;
    use tokio::task::JoinHandle;

    fn fast_client_config() -> ClientConfig {
        ClientConfig {
            poll_interval: Duration::from_millis(5),
            max_consecutive_errors: 3,
            submit_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            status_retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
        }
    }

    async fn spawn_server(
        provider: MockProvider,
        gate: InMemoryUsageGate,
    ) -> (String, Arc<InMemoryTaskStore>, JoinHandle<()>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(5),
            max_poll_attempts: 1000,
            max_consecutive_errors: 5,
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        };
        let worker = Arc::new(GenerationWorker::with_config(
            store.clone(),
            Arc::new(provider),
            config,
        ));
        let scheduler = Arc::new(TaskScheduler::new(worker));
        {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let _ = scheduler.run().await;
            });
        }
        let ctx = Arc::new(AppContext {
            store: store.clone(),
            scheduler,
            usage: Arc::new(gate),
        });
        let app = crate::web::handlers::router(ctx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}", addr), store, server)
    }

    fn test_request() -> GenerateRequest {
        let png = {
            let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
            data.extend_from_slice(&13u32.to_be_bytes());
            data.extend_from_slice(b"IHDR");
            data.extend_from_slice(&64u32.to_be_bytes());
            data.extend_from_slice(&64u32.to_be_bytes());
            data.extend_from_slice(&[8, 6, 0, 0, 0]);
            data
        };
        GenerateRequest {
            image_data_url: media::to_data_url("image/png", &png),
            prompt: "camera pans right".to_string(),
            settings: VideoSettings::default(),
            session_id: None,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_generate_and_wait_for_success() {
        let provider = MockProvider::new().with_polls(vec![
            MockProvider::processing(),
            MockProvider::success("https://cdn.example/v.mp4"),
        ]);
        let (base_url, _store, server) = spawn_server(provider, InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let handle = client.generate(test_request()).await.unwrap();
        assert!(handle.task_id().starts_with("task-"));

        let mut updates = 0;
        let snapshot = handle.wait_with(|_| updates += 1).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Success);
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.video_url.as_deref(), Some("https://cdn.example/v.mp4"));
        assert!(updates >= 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_once() {
        let provider = MockProvider::new().with_polls(vec![MockProvider::failure("bad input")]);
        let (base_url, _store, server) = spawn_server(provider, InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let handle = client.generate(test_request()).await.unwrap();
        match handle.wait().await {
            Err(ClientError::Generation(message)) => {
                assert!(message.contains("different image"));
            }
            other => panic!("expected generation failure, got {:?}", other.map(|s| s.status)),
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_usage_limit_propagates_without_retry() {
        let (base_url, store, server) =
            spawn_server(MockProvider::new(), InMemoryUsageGate::new(0)).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let mut request = test_request();
        request.session_id = Some("session-1".to_string());
        match client.generate(request).await {
            Err(ClientError::UsageLimit { remaining, total, .. }) => {
                assert_eq!(remaining, Some(0));
                assert_eq!(total, Some(0));
            }
            other => panic!("expected usage limit, got {:?}", other.map(|h| h.task_id)),
        }
        assert_eq!(store.len(), 0);

        server.abort();
    }

    #[tokio::test]
    async fn test_prompt_too_long_propagates() {
        let (base_url, _store, server) =
            spawn_server(MockProvider::new(), InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let mut request = test_request();
        request.prompt = "x".repeat(crate::task::types::MAX_PROMPT_LENGTH);
        match client.generate(request).await {
            Err(ClientError::PromptTooLong { max, .. }) => {
                assert_eq!(max, Some(crate::task::types::MAX_PROMPT_LENGTH));
            }
            other => panic!("expected prompt-too-long, got {:?}", other.map(|h| h.task_id)),
        }

        server.abort();
    }

    #[tokio::test]
    async fn test_cancel_stops_polling_and_marks_server_side() {
        // provider never completes, so the task stays cancellable
        let (base_url, store, server) =
            spawn_server(MockProvider::new(), InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let handle = client.generate(test_request()).await.unwrap();
        handle.cancel().await;

        let snapshot = handle.wait().await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);

        let stored = store.get(handle.task_id()).await.unwrap().unwrap();
        assert_eq!(stored.task.status, TaskStatus::Cancelled);

        server.abort();
    }

    #[tokio::test]
    async fn test_lost_connection_after_consecutive_poll_errors() {
        let provider = MockProvider::new();
        let (base_url, _store, server) = spawn_server(provider, InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let handle = client.generate(test_request()).await.unwrap();

        // kill the server; subsequent polls see connection errors
        server.abort();
        let _ = server.await;

        match handle.wait().await {
            Err(ClientError::LostConnection) => {}
            other => panic!("expected lost connection, got {:?}", other.map(|s| s.status)),
        }
    }

    #[tokio::test]
    async fn test_resubmit_creates_a_fresh_task() {
        let provider = MockProvider::new().with_polls(vec![
            MockProvider::success("https://cdn.example/a.mp4"),
            MockProvider::success("https://cdn.example/b.mp4"),
        ]);
        let (base_url, _store, server) = spawn_server(provider, InMemoryUsageGate::default()).await;

        let client = GenerationClient::with_config(&base_url, fast_client_config()).unwrap();
        let first = client.generate(test_request()).await.unwrap();
        first.wait().await.unwrap();

        let second = first.resubmit().await.unwrap();
        assert_ne!(first.task_id(), second.task_id());
        let snapshot = second.wait().await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Success);

        server.abort();
    }
}
