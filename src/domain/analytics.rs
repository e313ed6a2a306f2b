//! Read-side rollups over task and focus-session snapshots.
//!
//! Every function here is pure: callers pass the records and the calendar day
//! they consider "today". Dates are compared as `YYYY-MM-DD` strings.

use crate::domain::models::{Difficulty, FocusSession, GENERAL_TOPIC, Task};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const STREAK_WINDOW_DAYS: u32 = 365;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyCompletion {
    pub date: String,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl DailyCompletion {
    pub fn is_active(&self) -> bool {
        self.completed > 0
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopicFocus {
    pub topic: String,
    pub minutes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TodaySnapshot {
    pub date: String,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub completion_percentage: f64,
    pub focus_minutes: u64,
    pub focus_session_count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DifficultyBreakdown {
    pub easy: usize,
    pub medium: usize,
    pub hard: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub completed_tasks: usize,
    pub total_tasks: usize,
    pub total_focus_time: u64,
    pub streak: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapMetric {
    #[default]
    Completion,
    Tasks,
    Focus,
}

impl HeatmapMetric {
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(Self::Completion),
            "tasks" => Ok(Self::Tasks),
            "focus" => Ok(Self::Focus),
            other => Err(format!("unsupported heatmap metric: {other}")),
        }
    }

    /// Lower bounds for intensity levels 2, 3 and 4; level 1 is any value above zero.
    fn level_thresholds(self) -> [f64; 3] {
        match self {
            Self::Completion => [50.0, 70.0, 90.0],
            Self::Tasks => [4.0, 6.0, 8.0],
            Self::Focus => [60.0, 90.0, 120.0],
        }
    }

    fn level(self, value: f64) -> u8 {
        if value <= 0.0 {
            return 0;
        }
        let [two, three, four] = self.level_thresholds();
        if value >= four {
            4
        } else if value >= three {
            3
        } else if value >= two {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapCell {
    pub date: String,
    pub value: f64,
    pub tasks: usize,
    pub completed: usize,
    pub focus_time: u64,
    pub level: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapSummary {
    pub active_days: usize,
    pub total_tasks: usize,
    pub total_completed: usize,
    pub total_focus_minutes: u64,
    pub max_value: f64,
    pub avg_value: f64,
    pub current_streak: u32,
}

pub fn daily_completion_series(tasks: &[Task], days: u32, today: NaiveDate) -> Vec<DailyCompletion> {
    trailing_days(today, days)
        .map(|day| {
            let date = day.format("%Y-%m-%d").to_string();
            let (completed, total) = completion_counts(tasks, &date);
            DailyCompletion {
                percentage: percentage(completed, total),
                date,
                completed,
                total,
            }
        })
        .collect()
}

pub fn focus_time_by_topic(tasks: &[Task], sessions: &[FocusSession]) -> Vec<TopicFocus> {
    let topics_by_id = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.topic.as_str()))
        .collect::<HashMap<_, _>>();

    let mut totals: Vec<TopicFocus> = Vec::new();
    for session in sessions {
        let topic = session
            .task_id
            .as_deref()
            .and_then(|task_id| topics_by_id.get(task_id).copied())
            .unwrap_or(GENERAL_TOPIC);
        match totals.iter_mut().find(|entry| entry.topic == topic) {
            Some(entry) => entry.minutes += u64::from(session.duration),
            None => totals.push(TopicFocus {
                topic: topic.to_string(),
                minutes: u64::from(session.duration),
            }),
        }
    }
    totals
}

pub fn today_snapshot(tasks: &[Task], sessions: &[FocusSession], today: NaiveDate) -> TodaySnapshot {
    let date = today.format("%Y-%m-%d").to_string();
    let (completed_tasks, total_tasks) = completion_counts(tasks, &date);
    let todays_sessions = sessions
        .iter()
        .filter(|session| session.completed_on() == date)
        .collect::<Vec<_>>();

    TodaySnapshot {
        completed_tasks,
        total_tasks,
        completion_percentage: percentage(completed_tasks, total_tasks),
        focus_minutes: todays_sessions
            .iter()
            .map(|session| u64::from(session.duration))
            .sum(),
        focus_session_count: todays_sessions.len(),
        date,
    }
}

pub fn difficulty_breakdown(tasks: &[Task]) -> DifficultyBreakdown {
    tasks
        .iter()
        .fold(DifficultyBreakdown::default(), |mut breakdown, task| {
            match task.difficulty {
                Difficulty::Easy => breakdown.easy += 1,
                Difficulty::Medium => breakdown.medium += 1,
                Difficulty::Hard => breakdown.hard += 1,
            }
            breakdown
        })
}

/// Consecutive active days counted back from the last entry of `series`.
/// An inactive last entry is today still in progress and is skipped.
pub fn current_streak(series: &[DailyCompletion]) -> u32 {
    streak_from_latest(series.iter().map(DailyCompletion::is_active))
}

pub fn overall_stats(tasks: &[Task], sessions: &[FocusSession], today: NaiveDate) -> OverallStats {
    let series = daily_completion_series(tasks, STREAK_WINDOW_DAYS, today);
    OverallStats {
        completed_tasks: tasks.iter().filter(|task| task.is_done).count(),
        total_tasks: tasks.len(),
        total_focus_time: sessions.iter().map(|session| u64::from(session.duration)).sum(),
        streak: current_streak(&series),
    }
}

pub fn heatmap(
    tasks: &[Task],
    sessions: &[FocusSession],
    year: i32,
    metric: HeatmapMetric,
) -> Result<Vec<HeatmapCell>, String> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| format!("invalid year: {year}"))?;

    let mut focus_by_day: HashMap<&str, u64> = HashMap::new();
    for session in sessions {
        *focus_by_day.entry(session.completed_on()).or_default() += u64::from(session.duration);
    }

    let cells = first
        .iter_days()
        .take_while(|day| day.year() == year)
        .map(|day| {
            let date = day.format("%Y-%m-%d").to_string();
            let (completed, total) = completion_counts(tasks, &date);
            let focus_time = focus_by_day.get(date.as_str()).copied().unwrap_or(0);
            let value = match metric {
                HeatmapMetric::Completion => percentage(completed, total),
                HeatmapMetric::Tasks => total as f64,
                HeatmapMetric::Focus => focus_time as f64,
            };
            HeatmapCell {
                level: metric.level(value),
                date,
                value,
                tasks: total,
                completed,
                focus_time,
            }
        })
        .collect();
    Ok(cells)
}

pub fn heatmap_summary(cells: &[HeatmapCell], today: NaiveDate) -> HeatmapSummary {
    let today = today.format("%Y-%m-%d").to_string();
    let values = cells.iter().map(|cell| cell.value);
    let max_value = values.clone().fold(0.0_f64, f64::max);
    let avg_value = if cells.is_empty() {
        0.0
    } else {
        values.sum::<f64>() / cells.len() as f64
    };

    // Future days are skipped; the streak is counted from today backwards.
    let current_streak = cells
        .iter()
        .rev()
        .filter(|cell| cell.date <= today)
        .take_while(|cell| cell.level > 0)
        .count() as u32;

    HeatmapSummary {
        active_days: cells.iter().filter(|cell| cell.level > 0).count(),
        total_tasks: cells.iter().map(|cell| cell.tasks).sum(),
        total_completed: cells.iter().map(|cell| cell.completed).sum(),
        total_focus_minutes: cells.iter().map(|cell| cell.focus_time).sum(),
        max_value,
        avg_value,
        current_streak,
    }
}

fn streak_from_latest(activity: impl DoubleEndedIterator<Item = bool>) -> u32 {
    let mut streak = 0;
    for (offset, active) in activity.rev().enumerate() {
        if active {
            streak += 1;
        } else if offset == 0 {
            continue;
        } else {
            break;
        }
    }
    streak
}

fn trailing_days(today: NaiveDate, days: u32) -> impl Iterator<Item = NaiveDate> {
    (0..i64::from(days))
        .rev()
        .map(move |offset| today - Duration::days(offset))
}

fn completion_counts(tasks: &[Task], date: &str) -> (usize, usize) {
    tasks
        .iter()
        .filter(|task| task.date == date)
        .fold((0, 0), |(completed, total), task| {
            (completed + usize::from(task.is_done), total + 1)
        })
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
