//! TOML configuration for the ornotify daemon.
//!
//! Layered: an explicit path (CLI flag), then the `ORNOTIFY_CONFIG`
//! environment variable, then `/etc/ornotify/ornotify.toml`, then compiled-in
//! defaults. Secrets can additionally be supplied through environment
//! variables so they never have to live in the file.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SYSTEM_CONFIG_PATH: &str = "/etc/ornotify/ornotify.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from the explicit path, the environment, the
    /// system location, or defaults, in that order.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var("ORNOTIFY_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ORNOTIFY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            return Self::load(system_path);
        }

        debug!("no config file found, using compiled-in defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("ORNOTIFY_CRON_SECRET") {
            self.access.cron_secret = Some(secret);
        }
        if let Ok(key) = std::env::var("ORNOTIFY_SMS_API_KEY") {
            self.messaging.api_key = key;
        }
    }

    /// Reject settings that would only fail later at trigger time.
    pub fn validate(&self) -> Result<()> {
        self.schedule.timezone()?;
        cron::Schedule::from_str(&self.schedule.cron)
            .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", self.schedule.cron, e))?;
        if self.schedule.lead_days < 0 {
            anyhow::bail!("schedule.lead_days must not be negative");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind: String,
    /// SQLite database file.
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/ornotify.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// When the daily dispatch fires and which date it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Whether `serve` starts the background trigger loop.
    pub enabled: bool,
    /// 6-field cron expression (sec min hour dom mon dow) in `timezone`.
    pub cron: String,
    /// IANA timezone the hospital operates in.
    pub timezone: String,
    /// Days between "today" and the surgery date notifications are sent for.
    pub lead_days: i64,
    /// Job name recorded on every execution log row.
    pub job_name: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 7 * * *".to_string(),
            timezone: "Asia/Ho_Chi_Minh".to_string(),
            lead_days: 2,
            job_name: "surgery_notification".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {}", self.timezone, e))
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// Outbound SMS provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub provider_url: String,
    pub api_key: String,
    /// Fixed country-code parameter sent with every message.
    pub country_code: String,
    pub timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider_url: "http://localhost:9000/api/send".to_string(),
            api_key: String::new(),
            country_code: "84".to_string(),
            timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

/// Who may invoke the dispatch endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Shared secret the platform scheduler presents as a bearer token.
    pub cron_secret: Option<String>,
    /// Header a fronting proxy sets only on its own cron invocations, e.g.
    /// `x-scheduler-cron`. Only enable it when that proxy strips the header
    /// from outside requests. Off by default.
    pub scheduler_header: Option<String>,
    /// Bearer tokens accepted for operator endpoints.
    pub operator_tokens: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cron_secret: None,
            scheduler_header: None,
            operator_tokens: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}
