use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::ticker::{TickCallback, TickScheduler};
use crate::domain::analytics::{
    self, DailyCompletion, DifficultyBreakdown, HeatmapCell, HeatmapMetric, HeatmapSummary,
    OverallStats, TodaySnapshot, TopicFocus,
};
use crate::domain::models::{
    DEFAULT_TASK_TIME, Difficulty, FocusSession, NewFocusSession, NewTask, Setting, Task,
    TaskPatch, canonical_date, validate_hhmm,
};
use crate::domain::timer::{
    CompletedSession, FocusTimerEngine, MAX_TIMER_MINUTES, TimerEffect, TimerSnapshot,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::csv_codec::{parse_task_rows, write_sessions_csv, write_tasks_csv};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::focus_session_repository::{
    FocusSessionRepository, SqliteFocusSessionRepository,
};
use crate::infrastructure::settings_repository::{
    SettingsRepository, SqliteSettingsRepository, load_timer_settings, save_timer_settings,
};
use crate::infrastructure::task_repository::{SqliteTaskRepository, TaskRepository};
use chrono::{Datelike, Duration, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_DAILY_WINDOW: u32 = 7;
const MAX_DAILY_WINDOW: u32 = 366;

fn next_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Local timestamps keep the date prefix on the same calendar as [`today`].
fn now_rfc3339() -> String {
    Local::now().to_rfc3339()
}

/// Local calendar day used by every "today" query.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub struct AppState {
    config: AppConfig,
    tasks: Box<dyn TaskRepository>,
    sessions: Box<dyn FocusSessionRepository>,
    settings: Box<dyn SettingsRepository>,
    timer: Mutex<FocusTimerEngine>,
    scheduler: Arc<dyn TickScheduler>,
    /// Bumped under the timer lock on every arm and cancel.
    ticker_generation: AtomicU64,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, scheduler: Arc<dyn TickScheduler>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap, scheduler)
    }

    /// Builds the state over an already bootstrapped workspace.
    pub fn from_bootstrap(
        bootstrap: BootstrapResult,
        scheduler: Arc<dyn TickScheduler>,
    ) -> Result<Self, InfraError> {
        let database_path = bootstrap.database_path;
        tracing::info!(database = %database_path.display(), "opening workspace database");
        Self::with_repositories(
            bootstrap.config,
            Box::new(SqliteTaskRepository::new(&database_path)),
            Box::new(SqliteFocusSessionRepository::new(&database_path)),
            Box::new(SqliteSettingsRepository::new(&database_path)),
            scheduler,
        )
    }

    /// Restores the timer from the persisted settings in `settings`.
    pub fn with_repositories(
        config: AppConfig,
        tasks: Box<dyn TaskRepository>,
        sessions: Box<dyn FocusSessionRepository>,
        settings: Box<dyn SettingsRepository>,
        scheduler: Arc<dyn TickScheduler>,
    ) -> Result<Self, InfraError> {
        let persisted = load_timer_settings(settings.as_ref(), config.timer_defaults())?;
        tracing::info!(
            session_length = persisted.session_length,
            break_length = persisted.break_length,
            sessions_completed = persisted.sessions_completed,
            "app state initialized"
        );

        Ok(Self {
            config,
            tasks,
            sessions,
            settings,
            timer: Mutex::new(FocusTimerEngine::restore(persisted)),
            scheduler,
            ticker_generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }
}

fn lock_timer(state: &AppState) -> Result<MutexGuard<'_, FocusTimerEngine>, InfraError> {
    state
        .timer
        .lock()
        .map_err(|error| InfraError::Persistence(format!("timer lock poisoned: {error}")))
}

fn required_id(value: &str, field_name: &str) -> Result<String, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::Validation(format!("{field_name} must not be empty")));
    }
    Ok(value.to_string())
}

fn validated_date(value: &str) -> Result<String, InfraError> {
    canonical_date(value, "date").map_err(InfraError::Validation)
}

pub fn list_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    state.tasks.list()
}

pub fn list_tasks_for_date_impl(state: &AppState, date: String) -> Result<Vec<Task>, InfraError> {
    let date = validated_date(&date)?;
    state.tasks.list_for_date(&date)
}

pub fn list_today_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    state.tasks.list_for_date(&format_day(today()))
}

/// Undone tasks dated today or earlier.
pub fn list_overdue_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    state.tasks.list_overdue(&format_day(today()))
}

pub fn create_task_impl(state: &AppState, payload: NewTask) -> Result<Task, InfraError> {
    let task = payload
        .into_task(next_id(), now_rfc3339())
        .map_err(InfraError::Validation)?;
    state.tasks.insert(&task)?;
    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub fn update_task_impl(
    state: &AppState,
    task_id: String,
    patch: TaskPatch,
) -> Result<Task, InfraError> {
    let task_id = required_id(&task_id, "task_id")?;
    let Some(existing) = state.tasks.get(&task_id)? else {
        return Err(InfraError::NotFound(format!("task not found: {task_id}")));
    };
    if patch.is_empty() {
        return Ok(existing);
    }

    let updated = patch.apply_to(&existing).map_err(InfraError::Validation)?;
    state.tasks.update(&updated)?;
    state.log_info("update_task", &format!("updated task_id={task_id}"));
    Ok(updated)
}

pub fn delete_task_impl(state: &AppState, task_id: String) -> Result<(), InfraError> {
    let task_id = required_id(&task_id, "task_id")?;
    if !state.tasks.delete(&task_id)? {
        return Err(InfraError::NotFound(format!("task not found: {task_id}")));
    }
    state.log_info("delete_task", &format!("deleted task_id={task_id}"));
    Ok(())
}

pub fn list_focus_sessions_impl(state: &AppState) -> Result<Vec<FocusSession>, InfraError> {
    state.sessions.list()
}

pub fn create_focus_session_impl(
    state: &AppState,
    payload: NewFocusSession,
) -> Result<FocusSession, InfraError> {
    let session = payload
        .into_session(next_id(), now_rfc3339())
        .map_err(InfraError::Validation)?;
    state.sessions.record(&session)?;
    state.log_info(
        "create_focus_session",
        &format!(
            "recorded session_id={} task_id={} duration={}",
            session.id,
            session.task_id.as_deref().unwrap_or("-"),
            session.duration
        ),
    );
    Ok(session)
}

pub fn list_settings_impl(state: &AppState) -> Result<Vec<Setting>, InfraError> {
    state.settings.list()
}

pub fn get_setting_impl(state: &AppState, key: String) -> Result<Setting, InfraError> {
    let key = required_id(&key, "key")?;
    match state.settings.get(&key)? {
        Some(value) => Ok(Setting { key, value }),
        None => Err(InfraError::NotFound(format!("setting not found: {key}"))),
    }
}

pub fn set_setting_impl(state: &AppState, setting: Setting) -> Result<Setting, InfraError> {
    setting.validate().map_err(InfraError::Validation)?;
    let setting = Setting {
        key: setting.key.trim().to_string(),
        value: setting.value,
    };
    state.settings.set(&setting.key, &setting.value)?;
    state.log_info("set_setting", &format!("updated key={}", setting.key));
    Ok(setting)
}

pub fn get_timer_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    Ok(lock_timer(state)?.snapshot())
}

pub fn start_timer_impl(
    state: &Arc<AppState>,
    task_id: Option<String>,
) -> Result<TimerSnapshot, InfraError> {
    let task_id = task_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(task_id) = task_id.as_deref() {
        if state.tasks.get(task_id)?.is_none() {
            return Err(InfraError::NotFound(format!("task not found: {task_id}")));
        }
    }
    run_timer_command(state, "start_timer", |engine| engine.start(task_id))
}

pub fn pause_timer_impl(state: &Arc<AppState>) -> Result<TimerSnapshot, InfraError> {
    run_timer_command(state, "pause_timer", FocusTimerEngine::pause)
}

pub fn reset_timer_impl(state: &Arc<AppState>) -> Result<TimerSnapshot, InfraError> {
    run_timer_command(state, "reset_timer", FocusTimerEngine::reset)
}

pub fn tick_timer_impl(state: &Arc<AppState>) -> Result<TimerSnapshot, InfraError> {
    run_timer_command(state, "tick_timer", FocusTimerEngine::tick)
}

pub fn complete_timer_impl(state: &Arc<AppState>) -> Result<TimerSnapshot, InfraError> {
    run_timer_command(state, "complete_timer", FocusTimerEngine::complete_session)
}

/// Lengths are in minutes and must be positive. Absent values are left as is.
pub fn set_timer_lengths_impl(
    state: &Arc<AppState>,
    session_length: Option<i64>,
    break_length: Option<i64>,
) -> Result<TimerSnapshot, InfraError> {
    let session_length = session_length
        .map(|minutes| positive_minutes(minutes, "sessionLength"))
        .transpose()?;
    let break_length = break_length
        .map(|minutes| positive_minutes(minutes, "breakLength"))
        .transpose()?;

    run_timer_command(state, "set_timer_lengths", |engine| {
        let mut effects = Vec::new();
        if let Some(minutes) = session_length {
            effects.extend(engine.set_session_length(minutes));
        }
        if let Some(minutes) = break_length {
            effects.extend(engine.set_break_length(minutes));
        }
        // Only the final persisted subset needs writing.
        let last_persist = effects
            .iter()
            .rposition(|effect| matches!(effect, TimerEffect::PersistSettings(_)));
        effects
            .into_iter()
            .enumerate()
            .filter(|(index, effect)| {
                !matches!(effect, TimerEffect::PersistSettings(_)) || Some(*index) == last_persist
            })
            .map(|(_, effect)| effect)
            .collect()
    })
}

fn positive_minutes(minutes: i64, field_name: &str) -> Result<u32, InfraError> {
    if minutes <= 0 {
        return Err(InfraError::Validation(format!("{field_name} must be > 0")));
    }
    u32::try_from(minutes)
        .ok()
        .filter(|minutes| *minutes <= MAX_TIMER_MINUTES)
        .ok_or_else(|| {
            InfraError::Validation(format!(
                "{field_name} must be at most {MAX_TIMER_MINUTES} minutes"
            ))
        })
}

/// Applies one transition under the lock. Ticker effects run before the lock
/// is released so a late cancel can never stop a newer countdown; storage
/// effects run after. Every effect is attempted and the first failure is
/// returned.
fn run_timer_command<F>(
    state: &Arc<AppState>,
    command: &str,
    transition: F,
) -> Result<TimerSnapshot, InfraError>
where
    F: FnOnce(&mut FocusTimerEngine) -> Vec<TimerEffect>,
{
    let mut failures = Vec::new();
    let (storage_effects, snapshot) = {
        let mut engine = lock_timer(state)?;
        let mut storage_effects = Vec::new();
        for effect in transition(&mut engine) {
            let applied = match effect {
                TimerEffect::CancelTicker => {
                    state.ticker_generation.fetch_add(1, Ordering::SeqCst);
                    state.scheduler.cancel()
                }
                TimerEffect::ArmTicker => {
                    let generation = state.ticker_generation.fetch_add(1, Ordering::SeqCst) + 1;
                    state.scheduler.arm(ticker_callback(state, generation))
                }
                other => {
                    storage_effects.push(other);
                    Ok(())
                }
            };
            if let Err(error) = applied {
                failures.push(error);
            }
        }
        (storage_effects, engine.snapshot())
    };

    for effect in storage_effects {
        let applied = match effect {
            TimerEffect::RecordSession(completed) => record_completed_session(state, completed),
            TimerEffect::PersistSettings(settings) => {
                save_timer_settings(state.settings.as_ref(), &settings)
            }
            TimerEffect::CancelTicker | TimerEffect::ArmTicker => Ok(()),
        };
        if let Err(error) = applied {
            failures.push(error);
        }
    }

    for error in &failures {
        state.log_error(command, &error.to_string());
    }
    match failures.into_iter().next() {
        Some(error) => Err(error),
        None => Ok(snapshot),
    }
}

/// The ticker holds only a weak reference so it never keeps the state alive.
/// A tick from a ticker that has since been cancelled or replaced is dropped
/// under the timer lock.
fn ticker_callback(state: &Arc<AppState>, generation: u64) -> TickCallback {
    let state = Arc::downgrade(state);
    Arc::new(move || {
        let Some(state) = state.upgrade() else {
            return false;
        };
        let mut superseded = false;
        let result = run_timer_command(&state, "timer_tick", |engine| {
            if state.ticker_generation.load(Ordering::SeqCst) != generation {
                superseded = true;
                return Vec::new();
            }
            engine.tick()
        });
        if superseded {
            return false;
        }
        match result {
            Ok(snapshot) => snapshot.is_running,
            Err(error) => {
                state.log_error("timer_tick", &error.to_string());
                true
            }
        }
    })
}

fn record_completed_session(
    state: &AppState,
    completed: CompletedSession,
) -> Result<(), InfraError> {
    let task_id = match completed.task_id {
        Some(task_id) if state.tasks.get(&task_id)?.is_some() => Some(task_id),
        Some(task_id) => {
            state.log_info(
                "record_session",
                &format!("task_id={task_id} no longer exists; recording a general session"),
            );
            None
        }
        None => None,
    };

    let session = FocusSession {
        id: next_id(),
        task_id,
        duration: completed.duration_minutes,
        completed_at: now_rfc3339(),
        session_type: completed.session_type,
    };
    state.sessions.record(&session)?;
    state.log_info(
        "record_session",
        &format!(
            "completed session_id={} task_id={} duration={}",
            session.id,
            session.task_id.as_deref().unwrap_or("-"),
            session.duration
        ),
    );
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapResponse {
    pub year: i32,
    pub metric: HeatmapMetric,
    pub cells: Vec<HeatmapCell>,
    pub summary: HeatmapSummary,
}

pub fn get_overall_stats_impl(state: &AppState) -> Result<OverallStats, InfraError> {
    let tasks = state.tasks.list()?;
    let sessions = state.sessions.list()?;
    Ok(analytics::overall_stats(&tasks, &sessions, today()))
}

pub fn get_daily_completion_impl(
    state: &AppState,
    days: Option<u32>,
) -> Result<Vec<DailyCompletion>, InfraError> {
    let days = days.unwrap_or(DEFAULT_DAILY_WINDOW);
    if days == 0 || days > MAX_DAILY_WINDOW {
        return Err(InfraError::Validation(format!(
            "days must be between 1 and {MAX_DAILY_WINDOW}"
        )));
    }
    let tasks = state.tasks.list()?;
    Ok(analytics::daily_completion_series(&tasks, days, today()))
}

pub fn get_topic_focus_impl(state: &AppState) -> Result<Vec<TopicFocus>, InfraError> {
    let tasks = state.tasks.list()?;
    let sessions = state.sessions.list()?;
    Ok(analytics::focus_time_by_topic(&tasks, &sessions))
}

pub fn get_today_snapshot_impl(state: &AppState) -> Result<TodaySnapshot, InfraError> {
    let tasks = state.tasks.list()?;
    let sessions = state.sessions.list()?;
    Ok(analytics::today_snapshot(&tasks, &sessions, today()))
}

pub fn get_difficulty_breakdown_impl(state: &AppState) -> Result<DifficultyBreakdown, InfraError> {
    let tasks = state.tasks.list()?;
    Ok(analytics::difficulty_breakdown(&tasks))
}

pub fn get_heatmap_impl(
    state: &AppState,
    year: Option<i32>,
    metric: Option<String>,
) -> Result<HeatmapResponse, InfraError> {
    let today = today();
    let year = year.unwrap_or_else(|| today.year());
    let metric = match metric.as_deref() {
        Some(raw) => HeatmapMetric::parse(raw).map_err(InfraError::Validation)?,
        None => HeatmapMetric::default(),
    };

    let tasks = state.tasks.list()?;
    let sessions = state.sessions.list()?;
    let cells = analytics::heatmap(&tasks, &sessions, year, metric).map_err(InfraError::Validation)?;
    let summary = analytics::heatmap_summary(&cells, today);
    Ok(HeatmapResponse {
        year,
        metric,
        cells,
        summary,
    })
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportRange {
    #[default]
    All,
    Week,
    Month,
}

impl ExportRange {
    fn cutoff(self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::All => None,
            Self::Week => Some(today - Duration::days(7)),
            Self::Month => today.checked_sub_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskExportFilter {
    pub include_completed: bool,
    pub include_pending: bool,
    pub range: ExportRange,
}

impl Default for TaskExportFilter {
    fn default() -> Self {
        Self {
            include_completed: true,
            include_pending: true,
            range: ExportRange::All,
        }
    }
}

impl TaskExportFilter {
    fn keeps(&self, task: &Task, cutoff: Option<&str>) -> bool {
        if task.is_done && !self.include_completed {
            return false;
        }
        if !task.is_done && !self.include_pending {
            return false;
        }
        cutoff.is_none_or(|cutoff| task.date.as_str() >= cutoff)
    }
}

pub fn export_tasks_csv_impl(
    state: &AppState,
    filter: TaskExportFilter,
) -> Result<String, InfraError> {
    let cutoff = filter.range.cutoff(today()).map(format_day);
    let tasks = state
        .tasks
        .list()?
        .into_iter()
        .filter(|task| filter.keeps(task, cutoff.as_deref()))
        .collect::<Vec<_>>();
    let csv = write_tasks_csv(&tasks)?;
    state.log_info("export_tasks", &format!("exported {} tasks", tasks.len()));
    Ok(csv)
}

pub fn export_sessions_csv_impl(state: &AppState) -> Result<String, InfraError> {
    let sessions = state.sessions.list()?;
    let csv = write_sessions_csv(&sessions)?;
    state.log_info("export_sessions", &format!("exported {} sessions", sessions.len()));
    Ok(csv)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub skip_duplicates: bool,
    pub default_time: String,
    pub auto_complete: bool,
    pub default_difficulty: Difficulty,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
            default_time: DEFAULT_TASK_TIME.to_string(),
            auto_complete: false,
            default_difficulty: Difficulty::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportRowError>,
}

type DuplicateKey = (String, String, String);

fn duplicate_key(date: &str, title: &str, topic: &str) -> DuplicateKey {
    (
        date.trim().to_string(),
        title.trim().to_string(),
        topic.trim().to_string(),
    )
}

/// Imports every valid row. Invalid rows are reported by line number and do
/// not stop the rest of the file.
pub fn import_tasks_csv_impl(
    state: &AppState,
    body: &str,
    options: ImportOptions,
) -> Result<ImportReport, InfraError> {
    let default_time = options.default_time.trim().to_string();
    validate_hhmm(&default_time, "defaultTime").map_err(InfraError::Validation)?;

    let rows = parse_task_rows(body)?;
    let mut seen = state
        .tasks
        .list()?
        .iter()
        .map(|task| duplicate_key(&task.date, &task.title, &task.topic))
        .collect::<HashSet<_>>();

    let mut report = ImportReport::default();
    for row in rows {
        let mut payload = match row.task {
            Ok(payload) => payload,
            Err(message) => {
                report.errors.push(ImportRowError {
                    line: row.line,
                    message,
                });
                continue;
            }
        };

        payload.time.get_or_insert_with(|| default_time.clone());
        payload.difficulty.get_or_insert(options.default_difficulty);
        if options.auto_complete {
            payload.is_done = Some(true);
            payload.progress = Some(100);
        }

        let task = match payload.into_task(next_id(), now_rfc3339()) {
            Ok(task) => task,
            Err(message) => {
                report.errors.push(ImportRowError {
                    line: row.line,
                    message,
                });
                continue;
            }
        };

        let key = duplicate_key(&task.date, &task.title, &task.topic);
        if options.skip_duplicates && seen.contains(&key) {
            report.skipped += 1;
            continue;
        }
        state.tasks.insert(&task)?;
        seen.insert(key);
        report.imported += 1;
    }

    state.log_info(
        "import_tasks",
        &format!(
            "imported={} skipped={} errors={}",
            report.imported,
            report.skipped,
            report.errors.len()
        ),
    );
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::ticker::ManualTickScheduler;
    use crate::domain::models::SessionType;
    use crate::domain::timer::TimerPhase;
    use crate::infrastructure::settings_repository::{
        BREAK_LENGTH_KEY, InMemorySettingsRepository, SESSION_LENGTH_KEY, SESSIONS_COMPLETED_KEY,
    };
    use crate::infrastructure::test_support::unique_temp_dir;
    use std::fs;

    pub(crate) struct TempWorkspace {
        path: PathBuf,
        pub(crate) scheduler: Arc<ManualTickScheduler>,
    }

    impl TempWorkspace {
        pub(crate) fn new() -> Self {
            Self {
                path: unique_temp_dir("studytrack-command-tests"),
                scheduler: Arc::new(ManualTickScheduler::default()),
            }
        }

        pub(crate) fn app_state(&self) -> Arc<AppState> {
            let scheduler: Arc<dyn TickScheduler> = self.scheduler.clone();
            Arc::new(AppState::new(self.path.clone(), scheduler).expect("initialize app state"))
        }

        fn app_state_with_settings(&self, settings: Box<dyn SettingsRepository>) -> Arc<AppState> {
            let bootstrap = bootstrap_workspace(&self.path).expect("bootstrap workspace");
            let scheduler: Arc<dyn TickScheduler> = self.scheduler.clone();
            Arc::new(
                AppState::with_repositories(
                    bootstrap.config,
                    Box::new(SqliteTaskRepository::new(&bootstrap.database_path)),
                    Box::new(SqliteFocusSessionRepository::new(&bootstrap.database_path)),
                    settings,
                    scheduler,
                )
                .expect("initialize app state"),
            )
        }
    }

    /// Reads from memory and refuses every write.
    #[derive(Default)]
    struct ReadOnlySettingsRepository {
        inner: InMemorySettingsRepository,
    }

    impl SettingsRepository for ReadOnlySettingsRepository {
        fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), InfraError> {
            Err(InfraError::Persistence(format!("settings are read-only: {key}")))
        }

        fn list(&self) -> Result<Vec<Setting>, InfraError> {
            self.inner.list()
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn day_offset(days: i64) -> String {
        format_day(today() + Duration::days(days))
    }

    fn create(state: &AppState, title: &str, topic: &str, date: &str) -> Task {
        create_task_impl(state, NewTask::new(title, topic, date)).expect("create task")
    }

    #[test]
    fn create_task_rejects_missing_fields() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = create_task_impl(
            &state,
            NewTask {
                title: Some("   ".to_string()),
                ..NewTask::new("x", "Math", "2024-01-01")
            },
        );
        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert!(list_tasks_impl(&state).expect("list tasks").is_empty());
    }

    #[test]
    fn create_list_update_and_delete_tasks() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let created = create(&state, "Derivatives", "Math", "2024-01-15");
        let listed = list_tasks_impl(&state).expect("list tasks");
        assert_eq!(listed, vec![created.clone()]);

        let updated = update_task_impl(
            &state,
            created.id.clone(),
            TaskPatch {
                is_done: Some(true),
                progress: Some(100),
                ..TaskPatch::default()
            },
        )
        .expect("update task");
        assert!(updated.is_done);
        assert_eq!(
            list_tasks_for_date_impl(&state, "2024-01-15".to_string()).expect("list date"),
            vec![updated]
        );

        delete_task_impl(&state, created.id.clone()).expect("delete task");
        assert!(matches!(
            delete_task_impl(&state, created.id.clone()),
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            update_task_impl(&state, created.id, TaskPatch::default()),
            Err(InfraError::NotFound(_))
        ));
    }

    #[test]
    fn list_for_date_rejects_malformed_dates() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = list_tasks_for_date_impl(&state, "15/01/2024".to_string());
        assert!(matches!(result, Err(InfraError::Validation(_))));
    }

    #[test]
    fn unpadded_dates_are_found_by_date_queries_and_analytics() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create(&state, "Vectors", "Math", "2024-1-5");
        assert_eq!(task.date, "2024-01-05");

        for query in ["2024-01-05", "2024-1-5"] {
            let ids = list_tasks_for_date_impl(&state, query.to_string())
                .expect("tasks for date")
                .into_iter()
                .map(|task| task.id)
                .collect::<Vec<_>>();
            assert_eq!(ids, vec![task.id.clone()]);
        }

        update_task_impl(
            &state,
            task.id,
            TaskPatch {
                is_done: Some(true),
                ..TaskPatch::default()
            },
        )
        .expect("mark done");
        let tasks = list_tasks_impl(&state).expect("list tasks");
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid day");
        let series = analytics::daily_completion_series(&tasks, 1, day);
        assert_eq!(series[0].completed, 1);
        assert_eq!(series[0].total, 1);
    }

    #[test]
    fn today_and_overdue_views_use_local_date() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let today_task = create(&state, "Today", "Math", &day_offset(0));
        let old_task = create(&state, "Old", "Math", &day_offset(-3));
        let done_old = create(&state, "Done", "Math", &day_offset(-2));
        create(&state, "Future", "Math", &day_offset(2));
        update_task_impl(
            &state,
            done_old.id,
            TaskPatch {
                is_done: Some(true),
                ..TaskPatch::default()
            },
        )
        .expect("mark done");

        let today_ids = list_today_tasks_impl(&state)
            .expect("today tasks")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(today_ids, vec![today_task.id.clone()]);

        let overdue_ids = list_overdue_tasks_impl(&state)
            .expect("overdue tasks")
            .into_iter()
            .map(|task| task.id)
            .collect::<Vec<_>>();
        assert_eq!(overdue_ids, vec![old_task.id, today_task.id]);
    }

    #[test]
    fn focus_session_for_unknown_task_is_not_found() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = create_focus_session_impl(
            &state,
            NewFocusSession {
                task_id: Some("missing".to_string()),
                duration: Some(25),
                session_type: None,
            },
        );
        assert!(matches!(result, Err(InfraError::NotFound(_))));
        assert!(list_focus_sessions_impl(&state).expect("list sessions").is_empty());
    }

    #[test]
    fn focus_session_bumps_task_counter() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create(&state, "Essay", "English", "2024-01-15");

        create_focus_session_impl(
            &state,
            NewFocusSession {
                task_id: Some(task.id.clone()),
                duration: Some(30),
                session_type: Some(SessionType::Focus),
            },
        )
        .expect("record session");

        let tasks = list_tasks_impl(&state).expect("list tasks");
        assert_eq!(tasks[0].focus_sessions, 1);
        assert_eq!(list_focus_sessions_impl(&state).expect("list sessions").len(), 1);
    }

    #[test]
    fn settings_get_set_and_missing() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert!(matches!(
            get_setting_impl(&state, "theme".to_string()),
            Err(InfraError::NotFound(_))
        ));
        set_setting_impl(
            &state,
            Setting {
                key: "theme".to_string(),
                value: "dark".to_string(),
            },
        )
        .expect("set setting");
        assert_eq!(
            get_setting_impl(&state, "theme".to_string()).expect("get setting").value,
            "dark"
        );
        assert!(matches!(
            set_setting_impl(
                &state,
                Setting {
                    key: " ".to_string(),
                    value: "x".to_string(),
                },
            ),
            Err(InfraError::Validation(_))
        ));
    }

    #[test]
    fn timer_start_arms_and_pause_cancels_the_ticker() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let snapshot = start_timer_impl(&state, None).expect("start timer");
        assert_eq!(snapshot.phase, TimerPhase::Running);
        assert!(workspace.scheduler.is_armed());
        assert_eq!(workspace.scheduler.arm_count(), 1);

        assert_eq!(workspace.scheduler.fire(10), 10);
        assert_eq!(get_timer_impl(&state).expect("timer").remaining_seconds, 1490);

        let paused = pause_timer_impl(&state).expect("pause timer");
        assert_eq!(paused.phase, TimerPhase::Paused);
        assert!(!workspace.scheduler.is_armed());
        assert_eq!(workspace.scheduler.fire(5), 0);
    }

    #[test]
    fn replaced_ticker_cannot_tick_the_new_countdown() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let first = create(&state, "Limits", "Math", "2024-01-15");
        let second = create(&state, "Essay", "English", "2024-01-15");

        start_timer_impl(&state, Some(first.id)).expect("start first");
        assert_eq!(workspace.scheduler.fire(5), 5);
        let replaced = workspace.scheduler.armed_callback().expect("armed ticker");

        start_timer_impl(&state, Some(second.id.clone())).expect("start second");
        assert!(!replaced());
        let snapshot = get_timer_impl(&state).expect("timer");
        assert_eq!(snapshot.remaining_seconds, 1500);
        assert_eq!(snapshot.current_task_id.as_deref(), Some(second.id.as_str()));

        assert_eq!(workspace.scheduler.fire(1), 1);
        assert_eq!(get_timer_impl(&state).expect("timer").remaining_seconds, 1499);
    }

    #[test]
    fn cancelled_ticker_cannot_tick_a_restarted_countdown() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        start_timer_impl(&state, None).expect("start timer");
        let cancelled = workspace.scheduler.armed_callback().expect("armed ticker");
        pause_timer_impl(&state).expect("pause timer");
        start_timer_impl(&state, None).expect("restart timer");

        assert!(!cancelled());
        assert_eq!(get_timer_impl(&state).expect("timer").remaining_seconds, 1500);
    }

    #[test]
    fn timer_start_for_unknown_task_is_not_found() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = start_timer_impl(&state, Some("missing".to_string()));
        assert!(matches!(result, Err(InfraError::NotFound(_))));
        assert!(!workspace.scheduler.is_armed());
    }

    #[test]
    fn full_countdown_records_session_and_persists_count() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create(&state, "Integrals", "Math", "2024-01-15");

        set_timer_lengths_impl(&state, Some(1), None).expect("set length");
        start_timer_impl(&state, Some(task.id.clone())).expect("start timer");
        assert_eq!(workspace.scheduler.fire(120), 60);

        let snapshot = get_timer_impl(&state).expect("timer");
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.remaining_seconds, 60);
        assert_eq!(snapshot.current_task_id.as_deref(), Some(task.id.as_str()));

        let sessions = list_focus_sessions_impl(&state).expect("list sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].task_id.as_deref(), Some(task.id.as_str()));
        assert_eq!(sessions[0].duration, 1);
        assert_eq!(
            get_setting_impl(&state, SESSIONS_COMPLETED_KEY.to_string())
                .expect("count setting")
                .value,
            "1"
        );
    }

    #[test]
    fn completing_after_task_deletion_records_general_session() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create(&state, "Reading", "English", "2024-01-15");

        start_timer_impl(&state, Some(task.id.clone())).expect("start timer");
        delete_task_impl(&state, task.id).expect("delete task");
        complete_timer_impl(&state).expect("complete timer");

        let sessions = list_focus_sessions_impl(&state).expect("list sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].task_id, None);
        assert_eq!(sessions[0].duration, 25);
    }

    #[test]
    fn timer_lengths_reject_non_positive_values() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        for (session, brk) in [(Some(0), None), (None, Some(-5)), (Some(100_000), None)] {
            let result = set_timer_lengths_impl(&state, session, brk);
            assert!(matches!(result, Err(InfraError::Validation(_))));
        }
        assert_eq!(get_timer_impl(&state).expect("timer").session_length, 25);
    }

    #[test]
    fn failed_settings_write_is_returned_and_timer_keeps_its_state() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state_with_settings(Box::new(ReadOnlySettingsRepository::default()));
        let task = create(&state, "Proofs", "Math", "2024-01-15");

        let result = set_timer_lengths_impl(&state, Some(1), Some(7));
        assert!(matches!(&result, Err(error) if error.is_persistence()));
        let snapshot = get_timer_impl(&state).expect("timer");
        assert_eq!(snapshot.session_length, 1);
        assert_eq!(snapshot.break_length, 7);
        assert_eq!(snapshot.remaining_seconds, 60);

        start_timer_impl(&state, Some(task.id.clone())).expect("start timer");
        assert_eq!(workspace.scheduler.fire(120), 60);
        let snapshot = get_timer_impl(&state).expect("timer");
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.sessions_completed, 1);
        assert!(!workspace.scheduler.is_armed());

        start_timer_impl(&state, None).expect("restart timer");
        assert!(workspace.scheduler.is_armed());
        let result = complete_timer_impl(&state);
        assert!(matches!(&result, Err(error) if error.is_persistence()));
        let snapshot = get_timer_impl(&state).expect("timer");
        assert_eq!(snapshot.sessions_completed, 2);
        assert_eq!(snapshot.remaining_seconds, 60);
        assert!(!workspace.scheduler.is_armed());

        let sessions = list_focus_sessions_impl(&state).expect("list sessions");
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|session| session.duration == 1));
        assert_eq!(list_settings_impl(&state).expect("list settings"), Vec::new());
    }

    #[test]
    fn out_of_range_stored_length_is_ignored_on_restore() {
        let workspace = TempWorkspace::new();
        {
            let state = workspace.app_state();
            set_setting_impl(
                &state,
                Setting {
                    key: SESSION_LENGTH_KEY.to_string(),
                    value: "100000".to_string(),
                },
            )
            .expect("store raw setting");
        }

        let restored = workspace.app_state();
        let snapshot = get_timer_impl(&restored).expect("timer");
        assert_eq!(snapshot.session_length, 25);
        assert_eq!(snapshot.remaining_seconds, 1500);
    }

    #[test]
    fn timer_settings_survive_a_restart() {
        let workspace = TempWorkspace::new();
        {
            let state = workspace.app_state();
            set_timer_lengths_impl(&state, Some(45), Some(10)).expect("set lengths");
            start_timer_impl(&state, None).expect("start timer");
            complete_timer_impl(&state).expect("complete timer");
        }

        let restored = workspace.app_state();
        let snapshot = get_timer_impl(&restored).expect("timer");
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.session_length, 45);
        assert_eq!(snapshot.break_length, 10);
        assert_eq!(snapshot.remaining_seconds, 2700);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(
            get_setting_impl(&restored, SESSION_LENGTH_KEY.to_string())
                .expect("session length")
                .value,
            "45"
        );
        assert_eq!(
            get_setting_impl(&restored, BREAK_LENGTH_KEY.to_string())
                .expect("break length")
                .value,
            "10"
        );
    }

    #[test]
    fn reset_clears_task_and_cancels_ticker() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let task = create(&state, "Lab", "Physics", "2024-01-15");

        start_timer_impl(&state, Some(task.id)).expect("start timer");
        workspace.scheduler.fire(3);
        let snapshot = reset_timer_impl(&state).expect("reset timer");
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.current_task_id, None);
        assert_eq!(snapshot.remaining_seconds, 1500);
        assert!(!workspace.scheduler.is_armed());
    }

    #[test]
    fn analytics_reflect_stored_records() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let today = day_offset(0);

        let math = create(&state, "Limits", "Math", &today);
        create(&state, "Poem", "English", &today);
        update_task_impl(
            &state,
            math.id.clone(),
            TaskPatch {
                is_done: Some(true),
                difficulty: Some(Difficulty::Hard),
                ..TaskPatch::default()
            },
        )
        .expect("complete math");
        create_focus_session_impl(
            &state,
            NewFocusSession {
                task_id: Some(math.id),
                duration: Some(30),
                session_type: None,
            },
        )
        .expect("math session");
        create_focus_session_impl(
            &state,
            NewFocusSession {
                task_id: None,
                duration: Some(10),
                session_type: None,
            },
        )
        .expect("general session");

        let snapshot = get_today_snapshot_impl(&state).expect("today snapshot");
        assert_eq!(snapshot.completed_tasks, 1);
        assert_eq!(snapshot.total_tasks, 2);
        assert_eq!(snapshot.completion_percentage, 50.0);
        assert_eq!(snapshot.focus_minutes, 40);

        let topics = get_topic_focus_impl(&state).expect("topics");
        assert_eq!(
            topics,
            vec![
                TopicFocus {
                    topic: "Math".to_string(),
                    minutes: 30,
                },
                TopicFocus {
                    topic: "General".to_string(),
                    minutes: 10,
                },
            ]
        );

        let stats = get_overall_stats_impl(&state).expect("stats");
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.total_focus_time, 40);
        assert_eq!(stats.streak, 1);

        let breakdown = get_difficulty_breakdown_impl(&state).expect("difficulty");
        assert_eq!((breakdown.easy, breakdown.medium, breakdown.hard), (0, 1, 1));

        let daily = get_daily_completion_impl(&state, None).expect("daily");
        assert_eq!(daily.len(), 7);
        assert_eq!(daily.last().map(|day| day.percentage), Some(50.0));
        assert!(matches!(
            get_daily_completion_impl(&state, Some(0)),
            Err(InfraError::Validation(_))
        ));
    }

    #[test]
    fn heatmap_defaults_to_current_year_and_rejects_unknown_metric() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let response = get_heatmap_impl(&state, None, None).expect("heatmap");
        assert_eq!(response.year, today().year());
        assert_eq!(response.metric, HeatmapMetric::Completion);
        assert!(response.cells.len() >= 365);

        assert!(matches!(
            get_heatmap_impl(&state, Some(2024), Some("mood".to_string())),
            Err(InfraError::Validation(_))
        ));
    }

    #[test]
    fn export_filters_by_status_and_range() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let recent = create(&state, "Recent", "Math", &day_offset(-1));
        create(&state, "Ancient", "Math", "2000-01-01");
        update_task_impl(
            &state,
            recent.id,
            TaskPatch {
                is_done: Some(true),
                ..TaskPatch::default()
            },
        )
        .expect("complete recent");

        let everything = export_tasks_csv_impl(&state, TaskExportFilter::default()).expect("export");
        assert_eq!(everything.lines().count(), 3);

        let week = export_tasks_csv_impl(
            &state,
            TaskExportFilter {
                range: ExportRange::Week,
                ..TaskExportFilter::default()
            },
        )
        .expect("export week");
        assert!(week.contains("Recent"));
        assert!(!week.contains("Ancient"));

        let pending = export_tasks_csv_impl(
            &state,
            TaskExportFilter {
                include_completed: false,
                ..TaskExportFilter::default()
            },
        )
        .expect("export pending");
        assert!(!pending.contains("Recent"));
        assert!(pending.contains("Ancient"));

        let sessions = export_sessions_csv_impl(&state).expect("export sessions");
        assert_eq!(sessions.lines().count(), 1);
    }

    #[test]
    fn import_applies_options_and_reports_errors() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        create(&state, "Existing", "Math", "2024-01-15");

        let body = "Date,Title,Topic,Time,Difficulty\n\
                    2024-01-15,Existing,Math,,\n\
                    2024-01-16,Essay,English,,\n\
                    2024-01-16,Essay,English,,\n\
                    2024-13-40,Broken,Math,,\n\
                    2024-01-17,Lab,Physics,14:30,extreme\n\
                    2024-01-18,Review,Math,14:30,\n";
        let report = import_tasks_csv_impl(
            &state,
            body,
            ImportOptions {
                default_time: "07:15".to_string(),
                auto_complete: true,
                default_difficulty: Difficulty::Easy,
                ..ImportOptions::default()
            },
        )
        .expect("import");

        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            report.errors.iter().map(|error| error.line).collect::<Vec<_>>(),
            vec![5, 6]
        );

        let essay = list_tasks_for_date_impl(&state, "2024-01-16".to_string()).expect("essay");
        assert_eq!(essay.len(), 1);
        assert_eq!(essay[0].time.as_deref(), Some("07:15"));
        assert_eq!(essay[0].difficulty, Difficulty::Easy);
        assert!(essay[0].is_done);

        let review = list_tasks_for_date_impl(&state, "2024-01-18".to_string()).expect("review");
        assert_eq!(review[0].time.as_deref(), Some("14:30"));
    }

    #[test]
    fn import_without_duplicate_skipping_keeps_every_row() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let body = "Date,Title,Topic\n2024-01-16,Essay,English\n2024-01-16,Essay,English\n";
        let report = import_tasks_csv_impl(
            &state,
            body,
            ImportOptions {
                skip_duplicates: false,
                ..ImportOptions::default()
            },
        )
        .expect("import");
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn import_stores_unpadded_dates_zero_padded() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        create(&state, "Essay", "English", "2024-01-16");

        let body = "Date,Title,Topic\n2024-1-16,Essay,English\n2024-3-7,Lab,Physics\n";
        let report =
            import_tasks_csv_impl(&state, body, ImportOptions::default()).expect("import");
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);

        let imported = list_tasks_for_date_impl(&state, "2024-03-07".to_string())
            .expect("tasks for date");
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].date, "2024-03-07");
    }

    #[test]
    fn import_rejects_bad_default_time() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let result = import_tasks_csv_impl(
            &state,
            "Date,Title,Topic\n",
            ImportOptions {
                default_time: "noon".to_string(),
                ..ImportOptions::default()
            },
        );
        assert!(matches!(result, Err(InfraError::Validation(_))));
    }
}
