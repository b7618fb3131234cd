use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{UsageDecision, UsageGate};

/// Client for an external quota/promo service. The check is a GET with the
/// session in the query string; increments are POSTed fire-and-forget.
pub struct HttpUsageGate {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IncrementBody<'a> {
    session_id: &'a str,
}

impl HttpUsageGate {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UsageGate for HttpUsageGate {
    async fn can_generate(&self, session_id: &str, user_id: Option<&str>) -> Result<UsageDecision> {
        let mut query = vec![("sessionId", session_id)];
        if let Some(user_id) = user_id {
            query.push(("userId", user_id));
        }
        let response = self
            .client
            .get(format!("{}/usage", self.base_url))
            .query(&query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("usage service returned {}", response.status()));
        }
        Ok(response.json().await?)
    }

    async fn increment(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/usage/increment", self.base_url))
            .json(&IncrementBody { session_id })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("usage service returned {}", response.status()));
        }
        Ok(())
    }
}
