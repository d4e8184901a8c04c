//! ornotify -- operating-room schedule notifications.
//!
//! Sends each ward its surgery list ahead of time, records every delivery
//! attempt in an execution log, and lets operators reconcile and resend.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod surgery;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::notify::HttpSmsSender;

/// Wire the dispatcher to the configured SMS provider.
pub fn build_dispatcher(cfg: &Config, pool: storage::Pool) -> Result<Dispatcher> {
    let sender = HttpSmsSender::new(&cfg.messaging)?;
    let settings = DispatchSettings::from_config(&cfg.schedule)?;
    Ok(Dispatcher::new(pool, Arc::new(sender), settings))
}

/// Start the daemon: API server plus the daily trigger.
pub async fn serve(cfg: Config) -> Result<()> {
    // 1. Initialize Storage
    tracing::info!(db_path = %cfg.server.db_path, "Initializing database");
    let pool = storage::open_pool(&cfg.server.db_path)?;

    // 2. Dispatcher
    let dispatcher = build_dispatcher(&cfg, pool)?;

    // 3. Start Scheduler Engine (background task)
    if cfg.schedule.enabled {
        let trigger = scheduler::DailyTrigger::from_config(&cfg.schedule)?;
        let engine_dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(trigger, engine_dispatcher).await;
        });
    } else {
        tracing::info!("In-process scheduler disabled, relying on external triggers");
    }

    if cfg.access.cron_secret.is_none() && cfg.access.scheduler_header.is_none() {
        tracing::warn!("No cron secret or scheduler header configured; /cron/notify will reject every call");
    }

    // 4. Start API Server
    let addr: std::net::SocketAddr = cfg.server.bind.parse()?;
    let app = api::router(api::state::AppState::new(dispatcher, cfg.access.clone()));

    tracing::info!(%addr, "ornotify listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
