use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::HttpUsageGate;
pub use memory::InMemoryUsageGate;

/// Answer from the quota collaborator for one session/user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDecision {
    pub can_generate: bool,
    pub remaining: u32,
    pub total: u32,
    pub has_unlimited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Decides whether a session may generate another video today. Errors from an
/// implementation mean the collaborator is unreachable; the submission
/// endpoint treats that as "allow" rather than blocking the user.
#[async_trait]
pub trait UsageGate: Send + Sync + 'static {
    async fn can_generate(&self, session_id: &str, user_id: Option<&str>) -> Result<UsageDecision>;
    async fn increment(&self, session_id: &str) -> Result<()>;
}
