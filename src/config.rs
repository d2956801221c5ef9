use crate::error::NaggerError;
use nagger_core::schedule::{
    parse_timezone, ReminderDefaults, ReminderTime, DEFAULT_REMINDER_TIME, DEFAULT_TIMEZONE,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "NAGGER_CONFIG";

pub const MAX_MESSAGE_TTL_HOURS: u64 = 24 * 365;
pub const MAX_CLEANUP_INTERVAL_MINS: u64 = 7 * 24 * 60;
pub const MAX_NOTIFY_TIMEOUT_SECS: u64 = 60 * 60;
pub const MAX_LOG_RETENTION_DAYS: i64 = 10 * 365;

fn default_telegram_bot_token() -> String {
    String::new()
}
fn default_data_dir() -> String {
    "./nagger.data".into()
}
fn default_reminder_time() -> String {
    DEFAULT_REMINDER_TIME.into()
}
fn default_reminder_timezone() -> String {
    DEFAULT_TIMEZONE.into()
}
fn default_message_ttl_hours() -> u64 {
    48
}
fn default_cleanup_interval_mins() -> u64 {
    60
}
fn default_notify_timeout_secs() -> u64 {
    30
}
fn default_log_retention_days() -> i64 {
    30
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_telegram_bot_token")]
    pub telegram_bot_token: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Fallback `HH:MM` for chats that never ran `/setreminder`.
    #[serde(default = "default_reminder_time")]
    pub reminder_time: String,
    /// Fallback IANA timezone, also used when a stored chat timezone no longer resolves.
    #[serde(default = "default_reminder_timezone")]
    pub reminder_timezone: String,
    #[serde(default = "default_message_ttl_hours")]
    pub message_ttl_hours: u64,
    #[serde(default = "default_cleanup_interval_mins")]
    pub cleanup_interval_mins: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            telegram_bot_token: default_telegram_bot_token(),
            data_dir: default_data_dir(),
            reminder_time: default_reminder_time(),
            reminder_timezone: default_reminder_timezone(),
            message_ttl_hours: default_message_ttl_hours(),
            cleanup_interval_mins: default_cleanup_interval_mins(),
            notify_timeout_secs: default_notify_timeout_secs(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

impl Config {
    pub fn resolve_config_path() -> Result<Option<PathBuf>, NaggerError> {
        if let Ok(custom) = std::env::var(CONFIG_PATH_ENV) {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(NaggerError::Config(format!(
                "{CONFIG_PATH_ENV} points to non-existent file: {custom}"
            )));
        }

        if std::path::Path::new("./nagger.config.yaml").exists() {
            return Ok(Some(PathBuf::from("./nagger.config.yaml")));
        }
        if std::path::Path::new("./nagger.config.yml").exists() {
            return Ok(Some(PathBuf::from("./nagger.config.yml")));
        }
        Ok(None)
    }

    /// Load config from YAML (if any), then apply environment overrides and validate.
    pub fn load() -> Result<Self, NaggerError> {
        let mut config = match Self::resolve_config_path()? {
            Some(path) => Self::from_yaml_file(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok());
        config.post_deserialize()?;
        Ok(config)
    }

    fn from_yaml_file(path: &std::path::Path) -> Result<Self, NaggerError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NaggerError::Config(format!("Failed to read {path_str}: {e}")))?;
        serde_yaml::from_str(&content)
            .map_err(|e| NaggerError::Config(format!("Failed to parse {path_str}: {e}")))
    }

    /// Deployment variables win over file values. Blank values are ignored.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = token;
        }
        if let Some(time) = get("REMINDER_TIME") {
            self.reminder_time = time;
        }
        if let Some(tz) = get("REMINDER_TIMEZONE") {
            self.reminder_timezone = tz;
        }
        if let Some(dir) = get("NAGGER_DATA_DIR") {
            self.data_dir = dir;
        }
    }

    /// Apply post-deserialization normalization and validation.
    pub fn post_deserialize(&mut self) -> Result<(), NaggerError> {
        self.telegram_bot_token = self.telegram_bot_token.trim().to_string();
        if self.telegram_bot_token.is_empty() {
            return Err(NaggerError::Config(
                "telegram_bot_token is required (set it in nagger.config.yaml or TELEGRAM_BOT_TOKEN)"
                    .into(),
            ));
        }

        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }

        let time = ReminderTime::parse(&self.reminder_time)
            .map_err(|e| NaggerError::Config(format!("reminder_time: {e}")))?;
        self.reminder_time = time.to_string();

        self.reminder_timezone = self.reminder_timezone.trim().to_string();
        parse_timezone(&self.reminder_timezone)
            .map_err(|_| NaggerError::Config(format!("Invalid timezone: {}", self.reminder_timezone)))?;

        if self.message_ttl_hours == 0 {
            self.message_ttl_hours = default_message_ttl_hours();
        }
        if self.cleanup_interval_mins == 0 {
            self.cleanup_interval_mins = default_cleanup_interval_mins();
        }
        if self.notify_timeout_secs == 0 {
            self.notify_timeout_secs = default_notify_timeout_secs();
        }
        if self.log_retention_days <= 0 {
            self.log_retention_days = default_log_retention_days();
        }

        check_at_most("message_ttl_hours", self.message_ttl_hours, MAX_MESSAGE_TTL_HOURS)?;
        check_at_most(
            "cleanup_interval_mins",
            self.cleanup_interval_mins,
            MAX_CLEANUP_INTERVAL_MINS,
        )?;
        check_at_most(
            "notify_timeout_secs",
            self.notify_timeout_secs,
            MAX_NOTIFY_TIMEOUT_SECS,
        )?;
        check_at_most(
            "log_retention_days",
            self.log_retention_days,
            MAX_LOG_RETENTION_DAYS,
        )?;
        Ok(())
    }

    pub fn reminder_defaults(&self) -> Result<ReminderDefaults, NaggerError> {
        ReminderDefaults::new(&self.reminder_time, &self.reminder_timezone)
    }

    /// Clamped to `MAX_MESSAGE_TTL_HOURS` for configs that skipped validation.
    pub fn message_ttl(&self) -> chrono::Duration {
        let hours = self.message_ttl_hours.min(MAX_MESSAGE_TTL_HOURS);
        i64::try_from(hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or_else(|| chrono::Duration::hours(default_message_ttl_hours() as i64))
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        let mins = self.cleanup_interval_mins.min(MAX_CLEANUP_INTERVAL_MINS);
        std::time::Duration::from_secs(mins.saturating_mul(60))
    }

    pub fn notify_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.notify_timeout_secs.min(MAX_NOTIFY_TIMEOUT_SECS))
    }
}

fn check_at_most<T>(key: &str, value: T, max: T) -> Result<(), NaggerError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value > max {
        return Err(NaggerError::Config(format!(
            "{key} must be at most {max}, got {value}"
        )));
    }
    Ok(())
}
