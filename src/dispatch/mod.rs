//! Surgery notification dispatch: the daily run, delivery reconciliation and
//! manual resends, all sharing one execution log of record per target date.

pub mod log;
mod orchestrator;
mod reconcile;
mod resend;

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::config::ScheduleConfig;
use crate::notify::MessageSender;
use crate::storage::Pool;

pub use self::log::{
    Claim, ExecutionLog, LogDetails, LogFilter, LogOrigin, LogPage, LogStatus, LogStore, RoomResult, RoomStatus,
};
pub use self::orchestrator::RunOutcome;
pub use self::reconcile::{DeliveryState, RoomStatusReport, StatusQuery, StatusReport};
pub use self::resend::ResendOutcome;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing or malformed caller input.
    #[error("{0}")]
    Validation(String),

    /// No surgeries or no active destination for the request.
    #[error("{0}")]
    NotFound(String),

    /// Store failure. The detail is logged, never shown to callers.
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error("unauthorized")]
    Unauthorized,
}

/// Parse a `YYYY-MM-DD` request parameter.
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, DispatchError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DispatchError::Validation(format!("{} must be a YYYY-MM-DD date, got '{}'", field, raw)))
}

/// Date math shared by every entry point.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub job_name: String,
    pub lead_days: i64,
    pub timezone: Tz,
}

impl DispatchSettings {
    pub fn from_config(cfg: &ScheduleConfig) -> anyhow::Result<Self> {
        Ok(Self {
            job_name: cfg.job_name.clone(),
            lead_days: cfg.lead_days,
            timezone: cfg.timezone()?,
        })
    }
}

/// Entry point for dispatch, status and resend operations.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Pool,
    sender: Arc<dyn MessageSender>,
    logs: LogStore,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(pool: Pool, sender: Arc<dyn MessageSender>, settings: DispatchSettings) -> Self {
        let logs = LogStore::new(pool.clone(), settings.job_name.clone());
        Self {
            pool,
            sender,
            logs,
            settings,
        }
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Today's calendar date in the operating timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.timezone).date_naive()
    }

    /// The surgery date a run on `run_day` notifies about.
    pub fn target_for(&self, run_day: NaiveDate) -> NaiveDate {
        run_day + Duration::days(self.settings.lead_days)
    }
}
