use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use crate::config::ScheduleConfig;

/// The daily wall-clock trigger, evaluated in the operating timezone.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    schedule: CronSchedule,
    timezone: Tz,
}

impl DailyTrigger {
    pub fn new(cron_expr: &str, timezone: Tz) -> Result<Self> {
        let schedule = CronSchedule::from_str(cron_expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", cron_expr, e))?;
        Ok(Self { schedule, timezone })
    }

    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        Self::new(&cfg.cron, cfg.timezone()?)
    }

    /// Next firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Upcoming firings within the next `hours`, as local RFC 3339 strings.
    pub fn preview(&self, now: DateTime<Utc>, hours: u64) -> Vec<String> {
        let end = now + chrono::Duration::hours(hours as i64);
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .take_while(|t| t.with_timezone(&Utc) <= end)
            .map(|t| t.to_rfc3339())
            .collect()
    }
}
