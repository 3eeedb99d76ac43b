use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub deadline_scan_interval_secs: u64,
    pub deadline_scan_dry_run: bool,
    pub engine: EngineSettings,
}

/// Tunables shared by the bidding engine components.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bidding window opened by a package's first bid.
    pub bid_window_hours: i64,
    pub max_deadline_extensions: u32,
    pub deadline_extension_hours: i64,
    pub deadline_warning_hours: i64,
    pub notifier_timeout: Duration,
    pub notifier_max_attempts: u32,
    pub commit_max_attempts: u32,
    pub payment_max_attempts: u32,
}

/// Upper bound for every hour-valued setting: one year.
pub const MAX_SETTING_HOURS: i64 = 24 * 365;

impl EngineSettings {
    /// Rejects hour settings that would put deadlines in the past or overflow
    /// timestamp arithmetic.
    pub fn validate(&self) -> Result<(), AppError> {
        for (key, hours) in [
            ("BID_WINDOW_HOURS", self.bid_window_hours),
            ("DEADLINE_EXTENSION_HOURS", self.deadline_extension_hours),
            ("DEADLINE_WARNING_HOURS", self.deadline_warning_hours),
        ] {
            if !(1..=MAX_SETTING_HOURS).contains(&hours) {
                return Err(AppError::Internal(format!(
                    "invalid {key}: {hours} is outside 1..={MAX_SETTING_HOURS}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bid_window_hours: 24,
            max_deadline_extensions: 2,
            deadline_extension_hours: 24,
            deadline_warning_hours: 6,
            notifier_timeout: Duration::from_millis(2_000),
            notifier_max_attempts: 3,
            commit_max_attempts: 3,
            payment_max_attempts: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = EngineSettings::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            deadline_scan_interval_secs: parse_or_default("DEADLINE_SCAN_INTERVAL_SECS", 300)?,
            deadline_scan_dry_run: parse_or_default("DEADLINE_SCAN_DRY_RUN", false)?,
            engine: EngineSettings {
                bid_window_hours: parse_or_default("BID_WINDOW_HOURS", defaults.bid_window_hours)?,
                max_deadline_extensions: parse_or_default(
                    "MAX_DEADLINE_EXTENSIONS",
                    defaults.max_deadline_extensions,
                )?,
                deadline_extension_hours: parse_or_default(
                    "DEADLINE_EXTENSION_HOURS",
                    defaults.deadline_extension_hours,
                )?,
                deadline_warning_hours: parse_or_default(
                    "DEADLINE_WARNING_HOURS",
                    defaults.deadline_warning_hours,
                )?,
                notifier_timeout: Duration::from_millis(parse_or_default(
                    "NOTIFIER_TIMEOUT_MS",
                    2_000u64,
                )?),
                notifier_max_attempts: parse_or_default(
                    "NOTIFIER_MAX_ATTEMPTS",
                    defaults.notifier_max_attempts,
                )?,
                commit_max_attempts: parse_or_default(
                    "COMMIT_MAX_ATTEMPTS",
                    defaults.commit_max_attempts,
                )?,
                payment_max_attempts: parse_or_default(
                    "PAYMENT_MAX_ATTEMPTS",
                    defaults.payment_max_attempts,
                )?,
            },
        };

        config.engine.validate()?;
        Ok(config)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
