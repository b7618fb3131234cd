use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Display;

pub mod http;
#[cfg(test)]
pub mod testing;

pub use http::HttpVideoProvider;

/// Parameters for one provider job, already translated from the user request
/// (size string computed, quality mode resolved, prompt composed).
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub image_url: String,
    pub size: String,
    pub duration: u32,
    pub fps: u32,
    pub quality: QualityMode,
    pub prompt: Option<String>,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMode {
    Speed,
    Quality,
}

impl QualityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityMode::Speed => "speed",
            QualityMode::Quality => "quality",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Success,
    Fail,
}

/// Canonical poll result. Provider responses are normalized into this shape
/// immediately after receipt so schema variability stays in one place.
#[derive(Debug, Clone)]
pub struct JobPoll {
    pub state: JobState,
    pub video_url: Option<String>,
    /// Raw provider failure detail; logged, never surfaced verbatim.
    pub detail: Option<String>,
}

#[derive(Debug)]
pub enum ProviderError {
    /// Network-class failure: connect, timeout, reset. Retryable.
    Transport(String),
    /// HTTP error status from the provider endpoint.
    Status(u16, String),
    /// Provider accepted the call and reported an application error.
    Api(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status(code, _) => matches!(code, 500 | 502 | 503 | 504 | 408 | 429),
            ProviderError::Api(_) => false,
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "transport error: {}", msg),
            ProviderError::Status(code, msg) => write!(f, "provider returned {}: {}", code, msg),
            ProviderError::Api(msg) => write!(f, "provider error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

/// The external video-generation service, behind a trait so the worker can be
/// exercised against an in-memory fake.
#[async_trait]
pub trait VideoProvider: Send + Sync + 'static {
    /// Establish or verify the provider session before submitting work.
    async fn init(&self) -> Result<(), ProviderError>;
    /// Submit a generation job, returning the provider-side job id.
    async fn create_job(&self, request: &JobRequest) -> Result<String, ProviderError>;
    /// Query job progress. Transport failures are errors; provider-reported
    /// job failure is a normal `JobPoll` with `state: Fail`.
    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, ProviderError>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVideoResult {
    pub url: Option<String>,
}

/// Wire shape of a poll response. The result location is not uniform across
/// provider versions; every candidate field is represented here and collapsed
/// by [`normalize_poll`].
#[derive(Debug, Deserialize)]
pub(crate) struct RawPollResponse {
    pub task_status: Option<String>,
    pub video_result: Option<Vec<RawVideoResult>>,
    pub video_url: Option<String>,
    pub url: Option<String>,
    pub video: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Collapse a raw poll response into the canonical shape. Result-location
/// candidates are checked in priority order; an unknown status keeps the job
/// in `Processing` so the caller simply polls again.
pub(crate) fn normalize_poll(raw: RawPollResponse) -> JobPoll {
    let state = match raw.task_status.as_deref() {
        Some("SUCCESS") => JobState::Success,
        Some("FAIL") => JobState::Fail,
        _ => JobState::Processing,
    };
    let video_url = raw
        .video_result
        .as_ref()
        .and_then(|results| results.first())
        .and_then(|r| r.url.clone())
        .or(raw.video_url)
        .or(raw.url)
        .or(raw.video);
    let detail = raw.error.or(raw.message);
    JobPoll {
        state,
        video_url,
        detail,
    }
}
