//! Delivery reconciliation: live surgery counts against the log of record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::log::{LogStatus, RoomStatus};
use super::{DispatchError, Dispatcher};
use crate::notify::destination;
use crate::surgery;

/// Which date to report on. `execution_date` wins over `date`; with neither,
/// the report covers the date today's run targets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusQuery {
    /// Surgery date, used as is.
    pub date: Option<NaiveDate>,
    /// Day the job ran; the target is this plus the lead time.
    pub execution_date: Option<NaiveDate>,
}

/// Delivery state shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    SendFailed,
    Skipped,
    Error,
    /// No delivery attempt is recorded for the ward.
    NeedResend,
}

impl From<RoomStatus> for DeliveryState {
    fn from(s: RoomStatus) -> Self {
        match s {
            RoomStatus::Sent => DeliveryState::Sent,
            RoomStatus::SendFailed => DeliveryState::SendFailed,
            RoomStatus::Skipped => DeliveryState::Skipped,
            RoomStatus::Error => DeliveryState::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatusReport {
    pub room: String,
    pub current_count: usize,
    pub logged_count: usize,
    /// Surgeries were added after the delivered message went out.
    pub has_updates: bool,
    /// Not delivered, or delivered but stale.
    pub needs_attention: bool,
    pub status: DeliveryState,
    pub phone: Option<String>,
    pub reason: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub target_date: NaiveDate,
    pub total_surgeries: usize,
    pub log_id: Option<i64>,
    pub log_status: Option<LogStatus>,
    pub rooms: Vec<RoomStatusReport>,
}

impl Dispatcher {
    pub fn resolve_target(&self, query: &StatusQuery) -> NaiveDate {
        match (query.execution_date, query.date) {
            (Some(run_day), _) => self.target_for(run_day),
            (None, Some(date)) => date,
            (None, None) => self.target_for(self.today()),
        }
    }

    /// Compare current surgeries for the queried date with the last recorded
    /// delivery attempt, ward by ward.
    pub fn status(&self, query: &StatusQuery) -> Result<StatusReport, DispatchError> {
        let target = self.resolve_target(query);
        let counts = surgery::count_by_ward(&self.pool, target)?;
        let log = self.logs.find_for_date(target)?;
        debug!(%target, wards = counts.len(), has_log = log.is_some(), "building status report");

        let mut rooms = Vec::with_capacity(counts.len());
        for (room, &current_count) in &counts {
            let logged = log.as_ref().and_then(|l| l.details.room(room));

            let report = match logged {
                Some(r) => {
                    let has_updates = r.status == RoomStatus::Sent && current_count > r.surgery_count;
                    let last_attempt_at = r.resent_at.or_else(|| {
                        log.as_ref().map(|l| l.finished_at.unwrap_or(l.started_at))
                    });
                    let phone = match &r.phone {
                        Some(p) => Some(p.clone()),
                        None => self.live_phone(room)?,
                    };
                    RoomStatusReport {
                        room: room.clone(),
                        current_count,
                        logged_count: r.surgery_count,
                        has_updates,
                        needs_attention: r.status != RoomStatus::Sent || has_updates,
                        status: r.status.into(),
                        phone,
                        reason: r.reason.clone(),
                        last_attempt_at,
                    }
                }
                None => RoomStatusReport {
                    room: room.clone(),
                    current_count,
                    logged_count: 0,
                    has_updates: false,
                    needs_attention: current_count > 0,
                    status: DeliveryState::NeedResend,
                    phone: self.live_phone(room)?,
                    reason: None,
                    last_attempt_at: None,
                },
            };
            rooms.push(report);
        }

        Ok(StatusReport {
            target_date: target,
            total_surgeries: counts.values().sum(),
            log_id: log.as_ref().map(|l| l.id),
            log_status: log.as_ref().map(|l| l.status),
            rooms,
        })
    }

    fn live_phone(&self, room: &str) -> Result<Option<String>, DispatchError> {
        Ok(destination::resolve(&self.pool, room)?
            .destination()
            .map(|d| d.phone))
    }
}
