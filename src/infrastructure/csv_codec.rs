use crate::domain::models::{
    DEFAULT_TASK_TIME, Difficulty, FocusSession, GENERAL_TOPIC, NewTask, Task,
};
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};

pub const TASK_HEADERS: [&str; 9] = [
    "Date",
    "Title",
    "Topic",
    "Time",
    "Is_Done",
    "Progress",
    "Difficulty",
    "Focus_Sessions",
    "Order_Index",
];
pub const SESSION_HEADERS: [&str; 4] = ["Task_ID", "Duration", "Session_Type", "Completed_At"];
const REQUIRED_IMPORT_HEADERS: [&str; 3] = ["Date", "Title", "Topic"];

#[derive(Debug, Serialize)]
struct TaskCsvRecord<'a> {
    date: &'a str,
    title: &'a str,
    topic: &'a str,
    time: &'a str,
    is_done: u8,
    progress: u8,
    difficulty: &'a str,
    focus_sessions: u32,
    order_index: i64,
}

#[derive(Debug, Serialize)]
struct SessionCsvRecord<'a> {
    task_id: &'a str,
    duration: u32,
    session_type: &'a str,
    completed_at: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TaskImportRecord {
    #[serde(rename = "Date", default)]
    date: Option<String>,
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "Topic", default)]
    topic: Option<String>,
    #[serde(rename = "Time", default)]
    time: Option<String>,
    #[serde(rename = "Is_Done", default)]
    is_done: Option<String>,
    #[serde(rename = "Progress", default)]
    progress: Option<String>,
    #[serde(rename = "Difficulty", default)]
    difficulty: Option<String>,
}

/// One data line of an imported file: its 1-based line number and either the
/// task payload or the reason the row was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTaskRow {
    pub line: u64,
    pub task: Result<NewTask, String>,
}

pub fn write_tasks_csv(tasks: &[Task]) -> Result<String, InfraError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(TASK_HEADERS)?;
    for task in tasks {
        writer.serialize(TaskCsvRecord {
            date: &task.date,
            title: &task.title,
            topic: &task.topic,
            time: task.time.as_deref().unwrap_or(DEFAULT_TASK_TIME),
            is_done: u8::from(task.is_done),
            progress: task.progress,
            difficulty: task.difficulty.as_str(),
            focus_sessions: task.focus_sessions,
            order_index: task.order_index,
        })?;
    }
    finish(writer)
}

pub fn write_sessions_csv(sessions: &[FocusSession]) -> Result<String, InfraError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(SESSION_HEADERS)?;
    for session in sessions {
        writer.serialize(SessionCsvRecord {
            task_id: session.task_id.as_deref().unwrap_or(GENERAL_TOPIC),
            duration: session.duration,
            session_type: session.session_type.as_str(),
            completed_at: &session.completed_at,
        })?;
    }
    finish(writer)
}

/// Parses an import file. A missing required column fails the whole file;
/// bad values only reject their own row.
pub fn parse_task_rows(input: &str) -> Result<Vec<ParsedTaskRow>, InfraError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());
    let headers = reader.headers()?.clone();
    let missing = REQUIRED_IMPORT_HEADERS
        .iter()
        .filter(|required| !headers.iter().any(|header| header == **required))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(InfraError::Validation(format!(
            "missing CSV columns: {}",
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = record
            .position()
            .map(|position| position.line())
            .unwrap_or(index as u64 + 2);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let task = record
            .deserialize::<TaskImportRecord>(Some(&headers))
            .map_err(|error| error.to_string())
            .and_then(import_record_to_new_task);
        rows.push(ParsedTaskRow { line, task });
    }
    Ok(rows)
}

fn import_record_to_new_task(record: TaskImportRecord) -> Result<NewTask, String> {
    let is_done = record.is_done.as_deref().map(parse_flag).transpose()?;
    let progress = record
        .progress
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| format!("Progress must be a whole number (got {raw})"))
        })
        .transpose()?;
    let difficulty = record
        .difficulty
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(Difficulty::parse)
        .transpose()?;

    Ok(NewTask {
        title: record.title,
        topic: record.topic,
        date: record.date,
        time: record.time.filter(|time| !time.is_empty()),
        is_done,
        progress,
        difficulty,
        ..NewTask::default()
    })
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => Err(format!("Is_Done must be 1 or 0 (got {other})")),
    }
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, InfraError> {
    let bytes = writer
        .into_inner()
        .map_err(|error| InfraError::Io(error.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|error| InfraError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, error)))
}
