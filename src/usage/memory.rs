use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{UsageDecision, UsageGate};

pub const DEFAULT_DAILY_LIMIT: u32 = 3;

#[derive(Debug, Clone, Default)]
struct SessionUsage {
    date: Option<NaiveDate>,
    used_today: u32,
    bonus: u32,
    unlimited: bool,
}

impl SessionUsage {
    /// Counters reset on the first touch of a new calendar day. Bonus and
    /// unlimited grants carry over.
    fn roll_over(&mut self, today: NaiveDate) {
        if self.date != Some(today) {
            self.date = Some(today);
            self.used_today = 0;
        }
    }
}

/// In-process quota gate used in development and tests: a fixed daily free
/// allowance per session, plus bonus-video and unlimited grants that mirror
/// what promo-code redemption confers.
pub struct InMemoryUsageGate {
    daily_limit: u32,
    sessions: RwLock<HashMap<String, SessionUsage>>,
}

impl InMemoryUsageGate {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn grant_bonus(&self, session_id: &str, videos: u32) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("usage gate lock poisoned"))?;
        sessions.entry(session_id.to_string()).or_default().bonus += videos;
        Ok(())
    }

    pub fn grant_unlimited(&self, session_id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("usage gate lock poisoned"))?;
        sessions.entry(session_id.to_string()).or_default().unlimited = true;
        Ok(())
    }
}

impl Default for InMemoryUsageGate {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_LIMIT)
    }
}

#[async_trait]
impl UsageGate for InMemoryUsageGate {
    async fn can_generate(&self, session_id: &str, _user_id: Option<&str>) -> Result<UsageDecision> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("usage gate lock poisoned"))?;
        let usage = sessions.entry(session_id.to_string()).or_default();
        usage.roll_over(Utc::now().date_naive());

        if usage.unlimited {
            return Ok(UsageDecision {
                can_generate: true,
                remaining: u32::MAX,
                total: u32::MAX,
                has_unlimited: true,
                reason: None,
            });
        }

        let total = self.daily_limit + usage.bonus;
        let remaining = total.saturating_sub(usage.used_today);
        let can_generate = remaining > 0;
        Ok(UsageDecision {
            can_generate,
            remaining,
            total,
            has_unlimited: false,
            reason: if can_generate {
                None
            } else {
                Some("Daily limit reached. Try a promo code for more videos!".to_string())
            },
        })
    }

    async fn increment(&self, session_id: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("usage gate lock poisoned"))?;
        let usage = sessions.entry(session_id.to_string()).or_default();
        usage.roll_over(Utc::now().date_naive());
        usage.used_today += 1;
        Ok(())
    }
}
