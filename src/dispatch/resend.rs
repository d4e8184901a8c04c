//! Operator-triggered resend for one ward and date.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::log::{RoomResult, RoomStatus};
use super::{DispatchError, Dispatcher};
use crate::notify::{compose, destination, RenderProfile};
use crate::surgery;

#[derive(Debug, Clone, Serialize)]
pub struct ResendOutcome {
    pub success: bool,
    pub room: String,
    pub target_date: NaiveDate,
    pub phone: String,
    pub surgery_count: usize,
    pub response: Value,
    /// `None` when the result could not be merged into the log.
    pub log_id: Option<i64>,
    pub created_log: bool,
}

impl Dispatcher {
    /// Send the current surgery list for `room` on `date` once more and merge
    /// the outcome into that date's log of record.
    pub async fn resend(&self, date: NaiveDate, room: &str) -> Result<ResendOutcome, DispatchError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(DispatchError::Validation("room is required".to_string()));
        }

        let surgeries = surgery::list_for_date(&self.pool, date, Some(room))?;
        if surgeries.is_empty() {
            return Err(DispatchError::NotFound(format!(
                "no surgeries scheduled for '{}' on {}",
                room, date
            )));
        }

        let resolution = destination::resolve(&self.pool, room)?;
        let reason = resolution.skip_reason(room);
        let Some(dest) = resolution.destination() else {
            return Err(DispatchError::NotFound(
                reason.unwrap_or_else(|| format!("no destination for '{}'", room)),
            ));
        };

        let body = compose(
            RenderProfile::Resend,
            &dest.label,
            self.settings.lead_days,
            date,
            &surgeries,
        );
        let receipt = self.sender.send(&dest.phone, &body).await;
        let now = Utc::now();

        let result = RoomResult {
            room: room.to_string(),
            phone: Some(dest.phone.clone()),
            status: if receipt.success {
                RoomStatus::Sent
            } else {
                RoomStatus::SendFailed
            },
            surgery_count: surgeries.len(),
            response: Some(receipt.response.clone()),
            reason: (!receipt.success).then(|| "messaging provider rejected the message".to_string()),
            resent_at: Some(now),
        };
        let note = format!(
            "Manual resend to {} at {}: {} ({} surgeries)",
            room,
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            if receipt.success { "sent" } else { "failed" },
            surgeries.len()
        );

        let run_id = Uuid::new_v4().to_string();
        let (log_id, created_log) = match self.logs.merge_room_result(&run_id, date, result, &note) {
            Ok(m) => (Some(m.log_id), m.created),
            Err(e) => {
                error!(%room, %date, error = %e, "failed to record resend in execution log");
                (None, false)
            }
        };

        if receipt.success {
            info!(%room, %date, count = surgeries.len(), "resend delivered");
        } else {
            warn!(%room, %date, "resend rejected by provider");
        }

        Ok(ResendOutcome {
            success: receipt.success,
            room: room.to_string(),
            target_date: date,
            phone: dest.phone,
            surgery_count: surgeries.len(),
            response: receipt.response,
            log_id,
            created_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::log::LogStatus;
    use super::super::testutil::{add_rule, add_surgery, fixture};
    use super::*;
    use crate::notify::RecordingSender;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    #[tokio::test]
    async fn test_no_surgeries_is_not_found_and_sends_nothing() {
        let sender = Arc::new(RecordingSender::new());
        let (pool, d) = fixture(sender.clone());
        add_rule(&pool, "Ward A", "0901");

        let err = d.resend(date(), "Ward A").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
        assert!(sender.sent().is_empty());
        assert!(d.logs().find_for_date(date()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_rule_is_not_found() {
        let sender = Arc::new(RecordingSender::new());
        let (pool, d) = fixture(sender.clone());
        add_surgery(&pool, date(), Some("Ward B"), "b1");

        let err = d.resend(date(), "Ward B").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_blank_room_is_validation_error() {
        let (_, d) = fixture(Arc::new(RecordingSender::new()));
        let err = d.resend(date(), "  ").await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_resend_twice_keeps_one_room_result() {
        let sender = Arc::new(RecordingSender::new());
        let (pool, d) = fixture(sender.clone());
        add_surgery(&pool, date(), Some("Ward A"), "a1");
        add_surgery(&pool, date(), Some("Ward B"), "b1");
        add_rule(&pool, "Ward A", "0901");
        add_rule(&pool, "Ward B", "0902");
        let run = d.run_for(date()).await;

        add_surgery(&pool, date(), Some("Ward A"), "a2");
        let first = d.resend(date(), "Ward A").await.unwrap();
        let second = d.resend(date(), "Ward A").await.unwrap();
        assert!(first.success && second.success);
        assert_eq!(first.log_id, run.log_id);
        assert!(!second.created_log);

        let log = d.logs().find_for_date(date()).unwrap().unwrap();
        assert_eq!(log.details.rooms.len(), 2);
        let a: Vec<_> = log.details.rooms.iter().filter(|r| r.room == "Ward A").collect();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].surgery_count, 2);
        assert!(a[0].resent_at.is_some());
        assert_eq!(log.summary.matches("Manual resend to Ward A").count(), 2);
    }

    #[tokio::test]
    async fn test_second_attempt_overwrites_first() {
        let (pool, d) = fixture(Arc::new(RecordingSender::failing_for(&["0901"])));
        add_surgery(&pool, date(), Some("Ward A"), "a1");
        add_rule(&pool, "Ward A", "0901");

        let failed = d.resend(date(), "Ward A").await.unwrap();
        assert!(!failed.success);
        assert!(failed.created_log);
        let log = d.logs().find_for_date(date()).unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Error);

        add_rule(&pool, "Ward A", "0909");
        let ok = d.resend(date(), "Ward A").await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.phone, "0909");

        let log = d.logs().find_for_date(date()).unwrap().unwrap();
        assert_eq!(log.details.rooms.len(), 1);
        assert_eq!(log.details.rooms[0].status, RoomStatus::Sent);
        assert_eq!(log.details.rooms[0].phone.as_deref(), Some("0909"));
    }

    #[tokio::test]
    async fn test_resend_uses_resend_framing() {
        let sender = Arc::new(RecordingSender::new());
        let (pool, d) = fixture(sender.clone());
        add_surgery(&pool, date(), Some("Ward A"), "Nguyen Van A");
        add_rule(&pool, "Ward A", "0901");

        d.resend(date(), "Ward A").await.unwrap();
        let body = &sender.sent()[0].body;
        assert!(body.starts_with("[OR SCHEDULE - UPDATED] Ward A"));
        assert!(body.contains("1. Nguyen Van A (ID: -)"));
    }
}
