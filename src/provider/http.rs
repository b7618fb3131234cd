use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{normalize_poll, JobPoll, JobRequest, ProviderError, RawPollResponse, VideoProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// reqwest-backed provider client. Jobs are created with a POST and polled
/// with a GET on the async-result endpoint; both speak JSON.
pub struct HttpVideoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CreateJobBody<'a> {
    image_url: &'a str,
    size: &'a str,
    duration: u32,
    fps: u32,
    quality: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    id: String,
}

impl HttpVideoProvider {
    pub fn new(base_url: String, api_key: String) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status(status.as_u16(), body))
    }
}

#[async_trait]
impl VideoProvider for HttpVideoProvider {
    async fn init(&self) -> Result<(), ProviderError> {
        // cheap reachability check; the provider has no session handshake
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn create_job(&self, request: &JobRequest) -> Result<String, ProviderError> {
        let body = CreateJobBody {
            image_url: &request.image_url,
            size: &request.size,
            duration: request.duration,
            fps: request.fps,
            quality: request.quality.as_str(),
            prompt: request.prompt.as_deref(),
            seed: request.seed,
        };
        let response = self
            .client
            .post(format!("{}/videos/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let created: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("malformed job response: {}", e)))?;
        debug!("provider accepted job {}", created.id);
        Ok(created.id)
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, ProviderError> {
        let response = self
            .client
            .get(format!("{}/async-result/{}", self.base_url, job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let raw: RawPollResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("malformed poll response: {}", e)))?;
        Ok(normalize_poll(raw))
    }
}
