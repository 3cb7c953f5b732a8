//! Periodic scheduling abstraction for the keep-alive timer
//!
//! The deferral engine never talks to an event loop directly; the embedding
//! runtime supplies a [`Scheduler`] and the engine hands it a repeating task.
//! [`TokioScheduler`] is the implementation used by this server and its tests.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Whether a repeating task wants to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stop,
}

/// A task invoked once per period until it asks to stop.
pub type RepeatingTask = Box<dyn FnMut() -> Tick + Send>;

/// Source of periodic callbacks, supplied by the embedding runtime.
pub trait Scheduler: Send + Sync {
    /// Runs `task` every `period` until it returns [`Tick::Stop`]. Must not
    /// block the caller; the task runs on the scheduler's own execution
    /// context.
    fn repeat(&self, period: Duration, task: RepeatingTask);
}

/// Scheduler backed by the tokio runtime the server already runs on.
///
/// Ticks that pile up behind a stalled runtime are skipped rather than
/// bursted; a keep-alive that fires late is useful, three firing at once are
/// not.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn repeat(&self, period: Duration, mut task: RepeatingTask) {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() fires immediately; swallow that so the first real
            // tick lands one full period after arming.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if task() == Tick::Stop {
                    break;
                }
            }
        });
    }
}
