use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use vidgen_rs::provider::HttpVideoProvider;
use vidgen_rs::task::{GenerationWorker, InMemoryTaskStore, TaskScheduler};
use vidgen_rs::usage::{HttpUsageGate, InMemoryUsageGate, UsageGate};
use vidgen_rs::utils::logger;
use vidgen_rs::{AppContext, BIND_ADDR, LOG_DIR, PROVIDER_API_KEY, PROVIDER_URL, USAGE_URL};

#[tokio::main]
async fn main() -> Result<()> {
    vidgen_rs::init_env();
    let _guard = logger::init(LOG_DIR.clone())?;

    info!("Starting video generation service...");

    let store = Arc::new(InMemoryTaskStore::new());

    info!("Initializing provider client...");
    let provider = Arc::new(HttpVideoProvider::new(
        PROVIDER_URL.clone(),
        PROVIDER_API_KEY.clone(),
    )?);

    let usage: Arc<dyn UsageGate> = if USAGE_URL.is_empty() {
        warn!("VIDGEN_USAGE_URL not set, using the in-process usage gate");
        Arc::new(InMemoryUsageGate::default())
    } else {
        Arc::new(HttpUsageGate::new(USAGE_URL.clone())?)
    };

    info!("Initializing scheduler...");
    let worker = Arc::new(GenerationWorker::new(store.clone(), provider));
    let scheduler = Arc::new(TaskScheduler::new(worker));

    let ctx = Arc::new(AppContext {
        store,
        scheduler: scheduler.clone(),
        usage,
    });

    tokio::spawn(async move {
        if let Err(e) = scheduler.run().await {
            error!("Scheduler error: {}", e);
        }
    });

    let addr: SocketAddr = BIND_ADDR.parse()?;
    info!("Starting HTTP server at http://{}", addr);

    match vidgen_rs::web::start_server(ctx, addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
