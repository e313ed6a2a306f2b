//! Focus timer state machine.
//!
//! The engine owns no clock and performs no I/O. Each operation mutates the
//! in-memory [`TimerState`] and returns the [`TimerEffect`]s the caller has to
//! carry out: cancelling or arming the one-second ticker, recording a finished
//! session, persisting the durable subset of the state.

use crate::domain::models::SessionType;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
/// Upper bound for session and break lengths.
pub const MAX_TIMER_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    pub is_running: bool,
    pub remaining_seconds: u32,
    pub session_length: u32,
    pub break_length: u32,
    pub current_task_id: Option<String>,
    pub sessions_completed: u32,
    pub last_session_type: SessionType,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            is_running: false,
            remaining_seconds: DEFAULT_SESSION_MINUTES * 60,
            session_length: DEFAULT_SESSION_MINUTES,
            break_length: DEFAULT_BREAK_MINUTES,
            current_task_id: None,
            sessions_completed: 0,
            last_session_type: SessionType::Focus,
        }
    }
}

/// The part of [`TimerState`] that survives a restart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimerSettings {
    pub session_length: u32,
    pub break_length: u32,
    pub sessions_completed: u32,
}

impl Default for PersistedTimerSettings {
    fn default() -> Self {
        Self {
            session_length: DEFAULT_SESSION_MINUTES,
            break_length: DEFAULT_BREAK_MINUTES,
            sessions_completed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSession {
    pub task_id: Option<String>,
    pub duration_minutes: u32,
    pub session_type: SessionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEffect {
    CancelTicker,
    ArmTicker,
    RecordSession(CompletedSession),
    PersistSettings(PersistedTimerSettings),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub is_running: bool,
    pub remaining_seconds: u32,
    pub session_length: u32,
    pub break_length: u32,
    pub current_task_id: Option<String>,
    pub sessions_completed: u32,
    pub last_session_type: SessionType,
}

#[derive(Debug, Clone, Default)]
pub struct FocusTimerEngine {
    state: TimerState,
}

impl FocusTimerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle engine with a full countdown for the persisted session length.
    pub fn restore(persisted: PersistedTimerSettings) -> Self {
        Self {
            state: TimerState {
                remaining_seconds: persisted.session_length * 60,
                session_length: persisted.session_length,
                break_length: persisted.break_length,
                sessions_completed: persisted.sessions_completed,
                ..TimerState::default()
            },
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn phase(&self) -> TimerPhase {
        if self.state.is_running {
            TimerPhase::Running
        } else if self.state.remaining_seconds < self.full_countdown() {
            TimerPhase::Paused
        } else {
            TimerPhase::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase(),
            is_running: self.state.is_running,
            remaining_seconds: self.state.remaining_seconds,
            session_length: self.state.session_length,
            break_length: self.state.break_length,
            current_task_id: self.state.current_task_id.clone(),
            sessions_completed: self.state.sessions_completed,
            last_session_type: self.state.last_session_type,
        }
    }

    pub fn persisted(&self) -> PersistedTimerSettings {
        PersistedTimerSettings {
            session_length: self.state.session_length,
            break_length: self.state.break_length,
            sessions_completed: self.state.sessions_completed,
        }
    }

    /// Starting for a different task while running restarts the countdown and
    /// drops the time already spent on the previous one. Only a repeated start
    /// for the same bound task is ignored; a start without a task always
    /// restarts.
    pub fn start(&mut self, task_id: Option<String>) -> Vec<TimerEffect> {
        if self.state.is_running
            && task_id.is_some()
            && self.state.current_task_id == task_id
        {
            return Vec::new();
        }

        self.state.is_running = true;
        self.state.remaining_seconds = self.full_countdown();
        if task_id.is_some() {
            self.state.current_task_id = task_id;
        }
        self.state.last_session_type = SessionType::Focus;
        vec![TimerEffect::CancelTicker, TimerEffect::ArmTicker]
    }

    /// A countdown longer than a session shortened mid-run is cut to the new
    /// length.
    pub fn pause(&mut self) -> Vec<TimerEffect> {
        self.state.is_running = false;
        self.state.remaining_seconds = self.state.remaining_seconds.min(self.full_countdown());
        vec![TimerEffect::CancelTicker]
    }

    pub fn reset(&mut self) -> Vec<TimerEffect> {
        self.state.is_running = false;
        self.state.remaining_seconds = self.full_countdown();
        self.state.current_task_id = None;
        vec![TimerEffect::CancelTicker]
    }

    pub fn tick(&mut self) -> Vec<TimerEffect> {
        if !self.state.is_running || self.state.remaining_seconds == 0 {
            return Vec::new();
        }

        self.state.remaining_seconds -= 1;
        if self.state.remaining_seconds == 0 {
            return self.complete_session();
        }
        Vec::new()
    }

    pub fn complete_session(&mut self) -> Vec<TimerEffect> {
        let completed = CompletedSession {
            task_id: self.state.current_task_id.clone(),
            duration_minutes: self.state.session_length,
            session_type: SessionType::Focus,
        };

        self.state.is_running = false;
        self.state.sessions_completed = self.state.sessions_completed.saturating_add(1);
        self.state.remaining_seconds = self.full_countdown();

        vec![
            TimerEffect::CancelTicker,
            TimerEffect::RecordSession(completed),
            TimerEffect::PersistSettings(self.persisted()),
        ]
    }

    pub fn set_session_length(&mut self, minutes: u32) -> Vec<TimerEffect> {
        self.state.session_length = minutes;
        if !self.state.is_running {
            self.state.remaining_seconds = self.full_countdown();
        }
        vec![TimerEffect::PersistSettings(self.persisted())]
    }

    pub fn set_break_length(&mut self, minutes: u32) -> Vec<TimerEffect> {
        self.state.break_length = minutes;
        vec![TimerEffect::PersistSettings(self.persisted())]
    }

    fn full_countdown(&self) -> u32 {
        self.state.session_length.saturating_mul(60)
    }
}
