pub mod client;
pub mod media;
pub mod provider;
pub mod task;
pub mod usage;
pub mod utils;
pub mod web;

use std::{env, sync::Arc};

use once_cell::sync::Lazy;

use task::{TaskScheduler, TaskStore};
use usage::UsageGate;

/// Shared state handed to the HTTP handlers: the task store, the job
/// scheduler, and the quota gate.
pub struct AppContext {
    pub store: Arc<dyn TaskStore>,
    pub scheduler: Arc<TaskScheduler>,
    pub usage: Arc<dyn UsageGate>,
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7300";
const DEFAULT_PROVIDER_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const DEFAULT_LOG_DIR: &str = "./logs";

fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(_) => dotenv::var(key).unwrap_or_else(|_| default.to_string()),
    }
}

pub static BIND_ADDR: Lazy<String> = Lazy::new(|| env_or_default("VIDGEN_BIND_ADDR", DEFAULT_BIND_ADDR));

pub static PROVIDER_URL: Lazy<String> =
    Lazy::new(|| env_or_default("VIDGEN_PROVIDER_URL", DEFAULT_PROVIDER_URL));

pub static PROVIDER_API_KEY: Lazy<String> =
    Lazy::new(|| env_or_default("VIDGEN_PROVIDER_API_KEY", ""));

/// Base URL of the external quota/promo service; empty means the in-process
/// gate is used instead.
pub static USAGE_URL: Lazy<String> = Lazy::new(|| env_or_default("VIDGEN_USAGE_URL", ""));

pub static LOG_DIR: Lazy<String> = Lazy::new(|| env_or_default("VIDGEN_LOG_DIR", DEFAULT_LOG_DIR));

pub fn init_env() {
    dotenv::dotenv().ok();
}
