use crate::domain::timer::{MAX_TIMER_MINUTES, PersistedTimerSettings};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const HOST_ENV_KEYS: &[&str] = &["STUDYTRACK_HOST"];
pub const PORT_ENV_KEYS: &[&str] = &["STUDYTRACK_PORT"];
pub const LOG_ENV_KEYS: &[&str] = &["STUDYTRACK_LOG"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub schema: u8,
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub default_session_minutes: u32,
    pub default_break_minutes: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let timer = PersistedTimerSettings::default();
        Self {
            schema: 1,
            app_name: "StudyTrack".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            default_session_minutes: timer.session_length,
            default_break_minutes: timer.break_length,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.host.trim().is_empty() {
            return Err(InfraError::InvalidConfig("host must not be empty".to_string()));
        }
        let in_range = |minutes: u32| (1..=MAX_TIMER_MINUTES).contains(&minutes);
        if !in_range(self.default_session_minutes) || !in_range(self.default_break_minutes) {
            return Err(InfraError::InvalidConfig(format!(
                "default timer lengths must be between 1 and {MAX_TIMER_MINUTES} minutes"
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Timer values used when nothing has been persisted yet.
    pub fn timer_defaults(&self) -> PersistedTimerSettings {
        PersistedTimerSettings {
            session_length: self.default_session_minutes,
            break_length: self.default_break_minutes,
            sessions_completed: 0,
        }
    }

    /// Applies environment overrides on top of the file values.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = optional_lookup_value(&lookup, HOST_ENV_KEYS) {
            self.host = host;
        }
        if let Some(raw_port) = optional_lookup_value(&lookup, PORT_ENV_KEYS) {
            self.port = raw_port.parse::<u16>().map_err(|error| {
                InfraError::InvalidConfig(format!("port must be a number (got {raw_port}): {error}"))
            })?;
        }
        if let Some(level) = optional_lookup_value(&lookup, LOG_ENV_KEYS) {
            self.log_level = level;
        }
        self.validate()?;
        Ok(self)
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: AppConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
