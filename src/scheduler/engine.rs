use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use super::DailyTrigger;
use crate::dispatch::Dispatcher;

/// Main scheduler execution loop.
/// Sleeps until the next trigger instant, then runs the dispatch once.
pub async fn run_scheduler_loop(trigger: DailyTrigger, dispatcher: Dispatcher) {
    info!("Scheduler engine started");

    loop {
        let now = Utc::now();
        let Some(next) = trigger.next_after(now) else {
            warn!("cron schedule has no upcoming runs, scheduler stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(next = %next.to_rfc3339(), "next dispatch scheduled");
        tokio::time::sleep(wait).await;

        let outcome = dispatcher.run_once().await;
        if outcome.is_error() {
            error!(run_id = %outcome.run_id, summary = %outcome.summary, "scheduled dispatch failed");
        } else {
            info!(
                run_id = %outcome.run_id,
                target = %outcome.target_date,
                already_completed = outcome.already_completed,
                "scheduled dispatch finished"
            );
        }
    }
}
