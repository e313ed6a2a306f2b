use crate::domain::models::Setting;
use crate::domain::timer::{MAX_TIMER_MINUTES, PersistedTimerSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use rusqlite::{Connection, OptionalExtension, params};
#[cfg(test)]
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Mutex;

pub const SESSION_LENGTH_KEY: &str = "sessionLength";
pub const BREAK_LENGTH_KEY: &str = "breakLength";
pub const SESSIONS_COMPLETED_KEY: &str = "sessionsCompleted";

pub trait SettingsRepository: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError>;
    fn set(&self, key: &str, value: &str) -> Result<(), InfraError>;
    fn list(&self) -> Result<Vec<Setting>, InfraError>;
}

/// Reads the timer subset, keeping `fallback` for keys that are absent,
/// unparsable or, for lengths, outside `1..=MAX_TIMER_MINUTES`.
pub fn load_timer_settings(
    repository: &dyn SettingsRepository,
    fallback: PersistedTimerSettings,
) -> Result<PersistedTimerSettings, InfraError> {
    let read = |key: &str, default: u32| -> Result<u32, InfraError> {
        Ok(repository
            .get(key)?
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(default))
    };

    let minutes = |key: &str, default: u32| -> Result<u32, InfraError> {
        let value = read(key, default)?;
        Ok(if (1..=MAX_TIMER_MINUTES).contains(&value) { value } else { default })
    };

    Ok(PersistedTimerSettings {
        session_length: minutes(SESSION_LENGTH_KEY, fallback.session_length)?,
        break_length: minutes(BREAK_LENGTH_KEY, fallback.break_length)?,
        sessions_completed: read(SESSIONS_COMPLETED_KEY, fallback.sessions_completed)?,
    })
}

pub fn save_timer_settings(
    repository: &dyn SettingsRepository,
    settings: &PersistedTimerSettings,
) -> Result<(), InfraError> {
    repository.set(SESSION_LENGTH_KEY, &settings.session_length.to_string())?;
    repository.set(BREAK_LENGTH_KEY, &settings.break_length.to_string())?;
    repository.set(SESSIONS_COMPLETED_KEY, &settings.sessions_completed.to_string())?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteSettingsRepository {
    db_path: PathBuf,
}

impl SqliteSettingsRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

impl SettingsRepository for SqliteSettingsRepository {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO settings (key, value)
             VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Setting>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
        let rows = statement.query_map([], |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;
        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemorySettingsRepository {
    values: Mutex<BTreeMap<String, String>>,
}

#[cfg(test)]
impl SettingsRepository for InMemorySettingsRepository {
    fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::Persistence(format!("settings lock poisoned: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), InfraError> {
        let mut values = self
            .values
            .lock()
            .map_err(|error| InfraError::Persistence(format!("settings lock poisoned: {error}")))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Setting>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::Persistence(format!("settings lock poisoned: {error}")))?;
        Ok(values
            .iter()
            .map(|(key, value)| Setting {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}
