use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TASK_TIME: &str = "09:00";
pub const GENERAL_TOPIC: &str = "General";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("unsupported difficulty: {other}")),
        }
    }

    /// Unknown or empty stored values fall back to medium.
    pub fn from_stored(value: Option<&str>) -> Self {
        value
            .and_then(|raw| Self::parse(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Focus,
    Break,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Break => "break",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "focus" => Ok(Self::Focus),
            "break" => Ok(Self::Break),
            other => Err(format!("unsupported session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub date: String,
    pub time: Option<String>,
    pub is_done: bool,
    pub progress: u8,
    pub difficulty: Difficulty,
    pub order_index: i64,
    pub focus_sessions: u32,
    pub created_at: String,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        validate_non_empty(&self.topic, "task.topic")?;
        validate_date(&self.date, "task.date")?;
        if let Some(time) = self.time.as_deref() {
            validate_hhmm(time, "task.time")?;
        }
        if self.progress > 100 {
            return Err("task.progress must be <= 100".to_string());
        }
        Ok(())
    }
}

/// Create payload. Required fields are optional here so that a missing field
/// surfaces as a validation error rather than a body-parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: Option<String>,
    pub topic: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub is_done: Option<bool>,
    pub progress: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub order_index: Option<i64>,
    pub focus_sessions: Option<u32>,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        topic: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            title: Some(title.into()),
            topic: Some(topic.into()),
            date: Some(date.into()),
            ..Self::default()
        }
    }

    /// Validates the payload and turns it into a stored task.
    pub fn into_task(self, id: String, created_at: String) -> Result<Task, String> {
        let title = required_field(self.title, "task.title")?;
        let topic = required_field(self.topic, "task.topic")?;
        let date = canonical_date(&required_field(self.date, "task.date")?, "task.date")?;
        let time = normalize_time(self.time)?.or_else(|| Some(DEFAULT_TASK_TIME.to_string()));

        let task = Task {
            id,
            title,
            topic,
            date,
            time,
            is_done: self.is_done.unwrap_or(false),
            progress: clamp_progress(self.progress.unwrap_or(0)),
            difficulty: self.difficulty.unwrap_or_default(),
            order_index: self.order_index.unwrap_or(0),
            focus_sessions: self.focus_sessions.unwrap_or(0),
            created_at,
        };
        task.validate()?;
        Ok(task)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub topic: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub is_done: Option<bool>,
    pub progress: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub order_index: Option<i64>,
    pub focus_sessions: Option<u32>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies present fields to `task`; the task is left untouched on error.
    pub fn apply_to(&self, task: &Task) -> Result<Task, String> {
        let mut updated = task.clone();
        if let Some(title) = self.title.as_deref() {
            updated.title = title.trim().to_string();
        }
        if let Some(topic) = self.topic.as_deref() {
            updated.topic = topic.trim().to_string();
        }
        if let Some(date) = self.date.as_deref() {
            updated.date = canonical_date(date, "task.date")?;
        }
        if self.time.is_some() {
            updated.time = normalize_time(self.time.clone())?;
        }
        if let Some(is_done) = self.is_done {
            updated.is_done = is_done;
        }
        if let Some(progress) = self.progress {
            updated.progress = clamp_progress(progress);
        }
        if let Some(difficulty) = self.difficulty {
            updated.difficulty = difficulty;
        }
        if let Some(order_index) = self.order_index {
            updated.order_index = order_index;
        }
        if let Some(focus_sessions) = self.focus_sessions {
            updated.focus_sessions = focus_sessions;
        }
        updated.validate()?;
        Ok(updated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub id: String,
    pub task_id: Option<String>,
    pub duration: u32,
    pub completed_at: String,
    pub session_type: SessionType,
}

impl FocusSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        validate_non_empty(&self.completed_at, "session.completed_at")?;
        if self.duration == 0 {
            return Err("session.duration must be > 0".to_string());
        }
        Ok(())
    }

    /// Calendar day the session finished on, taken from the timestamp prefix.
    pub fn completed_on(&self) -> &str {
        date_prefix(&self.completed_at)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewFocusSession {
    pub task_id: Option<String>,
    pub duration: Option<i64>,
    pub session_type: Option<SessionType>,
}

impl NewFocusSession {
    pub fn into_session(self, id: String, completed_at: String) -> Result<FocusSession, String> {
        let duration = self
            .duration
            .ok_or_else(|| "session.duration is required".to_string())?;
        if duration <= 0 {
            return Err("session.duration must be > 0".to_string());
        }
        let duration = u32::try_from(duration)
            .map_err(|_| "session.duration is out of range".to_string())?;

        let session = FocusSession {
            id,
            task_id: self
                .task_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            duration,
            completed_at,
            session_type: self.session_type.unwrap_or_default(),
        };
        session.validate()?;
        Ok(session)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.key, "setting.key")
    }
}

pub fn clamp_progress(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// `YYYY-MM-DD` portion of a date or timestamp string.
pub fn date_prefix(value: &str) -> &str {
    value.get(..10).unwrap_or(value)
}

/// Parses a calendar date and returns it zero-padded, so `2024-1-5` becomes
/// `2024-01-05`.
pub fn canonical_date(value: &str, field_name: &str) -> Result<String, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(|date| date.format("%Y-%m-%d").to_string())
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))
}

/// Stored dates are compared as strings, so only the canonical form passes.
pub fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    if canonical_date(value, field_name)? != value {
        return Err(format!("{field_name} must be YYYY-MM-DD"));
    }
    Ok(())
}

pub fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn required_field(value: Option<String>, field_name: &str) -> Result<String, String> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    value.ok_or_else(|| format!("{field_name} is required"))
}

fn normalize_time(time: Option<String>) -> Result<Option<String>, String> {
    let Some(time) = time else {
        return Ok(None);
    };
    let time = time.trim();
    if time.is_empty() {
        return Ok(None);
    }
    validate_hhmm(time, "task.time")?;
    Ok(Some(time.to_string()))
}
