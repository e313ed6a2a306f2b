use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Called once per second while armed. Returning `false` stops the ticker.
pub type TickCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// Drives the focus timer. At most one ticker is live: arming replaces the
/// previous one.
pub trait TickScheduler: Send + Sync {
    fn arm(&self, on_tick: TickCallback) -> Result<(), InfraError>;
    fn cancel(&self) -> Result<(), InfraError>;
}

pub struct TokioTickScheduler {
    runtime: Handle,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTickScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, Option<JoinHandle<()>>>, InfraError> {
        self.active
            .lock()
            .map_err(|error| InfraError::Persistence(format!("ticker lock poisoned: {error}")))
    }
}

impl TickScheduler for TokioTickScheduler {
    fn arm(&self, on_tick: TickCallback) -> Result<(), InfraError> {
        let mut active = self.lock_active()?;
        if let Some(previous) = active.take() {
            previous.abort();
        }

        *active = Some(self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn cancel(&self) -> Result<(), InfraError> {
        if let Some(handle) = self.lock_active()?.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for TokioTickScheduler {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(handle) = active.take() {
                handle.abort();
            }
        }
    }
}

/// Scheduler without a clock: the armed callback runs only through [`fire`].
///
/// [`fire`]: ManualTickScheduler::fire
#[derive(Default)]
pub struct ManualTickScheduler {
    armed: Mutex<Option<TickCallback>>,
    arm_count: Mutex<usize>,
    cancel_count: Mutex<usize>,
}

impl ManualTickScheduler {
    pub fn is_armed(&self) -> bool {
        self.armed.lock().map(|armed| armed.is_some()).unwrap_or(false)
    }

    pub fn arm_count(&self) -> usize {
        self.arm_count.lock().map(|count| *count).unwrap_or(0)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.lock().map(|count| *count).unwrap_or(0)
    }

    /// The currently armed callback, kept callable after a later re-arm.
    pub fn armed_callback(&self) -> Option<TickCallback> {
        self.armed.lock().ok().and_then(|armed| armed.clone())
    }

    /// Runs the armed callback `times` times and returns how many ran.
    /// Stops early once the ticker is cancelled or the callback asks to stop.
    pub fn fire(&self, times: usize) -> usize {
        let mut fired = 0;
        for _ in 0..times {
            let Some(callback) = self.armed_callback() else {
                break;
            };
            fired += 1;
            if !callback() {
                if let Ok(mut armed) = self.armed.lock() {
                    *armed = None;
                }
                break;
            }
        }
        fired
    }
}

impl TickScheduler for ManualTickScheduler {
    fn arm(&self, on_tick: TickCallback) -> Result<(), InfraError> {
        let mut armed = self
            .armed
            .lock()
            .map_err(|error| InfraError::Persistence(format!("ticker lock poisoned: {error}")))?;
        *armed = Some(on_tick);
        if let Ok(mut count) = self.arm_count.lock() {
            *count += 1;
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), InfraError> {
        let mut armed = self
            .armed
            .lock()
            .map_err(|error| InfraError::Persistence(format!("ticker lock poisoned: {error}")))?;
        *armed = None;
        if let Ok(mut count) = self.cancel_count.lock() {
            *count += 1;
        }
        Ok(())
    }
}
