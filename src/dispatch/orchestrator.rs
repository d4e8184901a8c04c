//! The daily dispatch run.

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::log::{Claim, LogDetails, LogStatus, RoomResult, RoomStatus};
use super::Dispatcher;
use crate::notify::{compose, destination, RenderProfile, Resolution};
use crate::surgery::{self, Surgery};

/// Result of one dispatch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    /// `None` when the log row could not be written.
    pub log_id: Option<i64>,
    pub target_date: NaiveDate,
    pub status: LogStatus,
    pub summary: String,
    pub total_surgeries: usize,
    pub rooms: Vec<RoomResult>,
    /// The log of record was already complete, nothing was sent.
    pub already_completed: bool,
}

impl RunOutcome {
    pub fn is_error(&self) -> bool {
        self.status == LogStatus::Error
    }
}

fn summarize(target: NaiveDate, total: usize, rooms: &[RoomResult]) -> String {
    let count = |s: RoomStatus| rooms.iter().filter(|r| r.status == s).count();
    format!(
        "Surgery notifications for {}: {} sent, {} failed, {} skipped, {} errors ({} wards, {} surgeries)",
        target,
        count(RoomStatus::Sent),
        count(RoomStatus::SendFailed),
        count(RoomStatus::Skipped),
        count(RoomStatus::Error),
        rooms.len(),
        total
    )
}

impl Dispatcher {
    /// Scheduled entry point: target today + lead time.
    pub async fn run(&self) -> RunOutcome {
        let target = self.target_for(self.today());
        self.run_for(target).await
    }

    /// Like [`Dispatcher::run`], but returns the recorded outcome instead of
    /// sending again when a daily run already completed successfully for the
    /// target date. A row left by a manual resend does not count.
    pub async fn run_once(&self) -> RunOutcome {
        let target = self.target_for(self.today());
        match self.logs.find_for_date(target) {
            Ok(Some(log)) if log.is_completed_run() => {
                info!(%target, log_id = log.id, "dispatch already completed for target date");
                RunOutcome {
                    run_id: log.run_id,
                    log_id: Some(log.id),
                    target_date: target,
                    status: log.status,
                    summary: log.summary,
                    total_surgeries: log.details.rooms.iter().map(|r| r.surgery_count).sum(),
                    rooms: log.details.rooms,
                    already_completed: true,
                }
            }
            Ok(_) => self.run_for(target).await,
            Err(e) => {
                warn!(%target, error = %e, "could not check previous run, dispatching anyway");
                self.run_for(target).await
            }
        }
    }

    /// Dispatch notifications for surgeries on `target`.
    pub async fn run_for(&self, target: NaiveDate) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, %target, "starting surgery notification dispatch");

        let claim = match self.logs.claim(&run_id, target) {
            Ok(claim) => Some(claim),
            Err(e) => {
                error!(%run_id, error = %e, "failed to create execution log, continuing without it");
                None
            }
        };

        let mut outcome = RunOutcome {
            run_id,
            log_id: claim.map(|c| c.id),
            target_date: target,
            status: LogStatus::Running,
            summary: String::new(),
            total_surgeries: 0,
            rooms: Vec::new(),
            already_completed: false,
        };

        let surgeries = match surgery::list_for_date(&self.pool, target, None) {
            Ok(s) => s,
            Err(e) => {
                error!(run_id = %outcome.run_id, error = %e, "surgery query failed");
                outcome.status = LogStatus::Error;
                outcome.summary = format!("Surgery notifications for {}: failed to load surgeries", target);
                self.finalize(claim, &outcome, None);
                return outcome;
            }
        };

        outcome.total_surgeries = surgeries.len();
        if surgeries.is_empty() {
            info!(run_id = %outcome.run_id, %target, "no surgeries scheduled, nothing to send");
            outcome.status = LogStatus::Success;
            outcome.summary = format!("Surgery notifications for {}: no surgeries scheduled", target);
            self.finalize(claim, &outcome, Some(&LogDetails::default()));
            return outcome;
        }

        let groups = surgery::group_by_ward(surgeries);
        let tasks = groups
            .iter()
            .map(|(ward, list)| self.dispatch_ward(target, ward, list));
        outcome.rooms = join_all(tasks).await;

        outcome.status = LogStatus::Success;
        outcome.summary = summarize(target, outcome.total_surgeries, &outcome.rooms);
        info!(run_id = %outcome.run_id, summary = %outcome.summary, "dispatch finished");

        let details = LogDetails {
            rooms: outcome.rooms.clone(),
        };
        self.finalize(claim, &outcome, Some(&details));
        outcome
    }

    fn finalize(&self, claim: Option<Claim>, outcome: &RunOutcome, details: Option<&LogDetails>) {
        let Some(claim) = claim else { return };
        if let Err(e) = self.logs.finish(&claim, outcome.status, &outcome.summary, details) {
            error!(run_id = %outcome.run_id, log_id = claim.id, error = %e, "failed to finalize execution log");
        }
    }

    /// Resolve, compose and send for one ward. Never fails: every problem
    /// becomes the ward's recorded status.
    async fn dispatch_ward(&self, target: NaiveDate, ward: &str, surgeries: &[Surgery]) -> RoomResult {
        let mut result = RoomResult {
            room: ward.to_string(),
            phone: None,
            status: RoomStatus::Error,
            surgery_count: surgeries.len(),
            response: None,
            reason: None,
            resent_at: None,
        };

        let resolution = match destination::resolve(&self.pool, ward) {
            Ok(r) => r,
            Err(e) => {
                error!(%ward, error = %e, "destination lookup failed");
                result.reason = Some("destination lookup failed".to_string());
                return result;
            }
        };

        let dest = match resolution {
            Resolution::Resolved(d) => d,
            other => {
                let reason = other.skip_reason(ward);
                warn!(%ward, reason = ?reason, "skipping ward");
                result.status = RoomStatus::Skipped;
                result.reason = reason;
                return result;
            }
        };

        let body = compose(
            RenderProfile::Scheduled,
            &dest.label,
            self.settings.lead_days,
            target,
            surgeries,
        );
        let receipt = self.sender.send(&dest.phone, &body).await;

        result.phone = Some(dest.phone);
        result.response = Some(receipt.response);
        if receipt.success {
            info!(%ward, count = surgeries.len(), "notification sent");
            result.status = RoomStatus::Sent;
        } else {
            warn!(%ward, "provider did not accept notification");
            result.status = RoomStatus::SendFailed;
            result.reason = Some("messaging provider rejected the message".to_string());
        }
        result
    }
}
