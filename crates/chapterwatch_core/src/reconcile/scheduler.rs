//! Periodic run scheduler.
//!
//! # Responsibility
//! - Fire a reconciliation pass at a fixed period on one background task.
//! - Serve on-demand passes without ever overlapping a timer-triggered one.
//!
//! # Invariants
//! - At most one pass executes at any time (`RunState` gate).
//! - A manual trigger during an in-flight pass is rejected with
//!   `SchedulerStateError::RunInProgress`; it never waits.
//! - A timer tick that finds a pass in flight is skipped, not queued.
//! - `stop()` never interrupts an in-flight pass.

use super::error::{SchedulerError, SchedulerStateError};
use super::run::{Reconciler, RunReport};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Whether a reconciliation pass is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// What started a pass; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Manual,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }
}

enum TimerState {
    Stopped,
    Ticking {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

/// Holds the run gate for the lifetime of one pass.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl<'a> RunGuard<'a> {
    fn acquire(state: &'a Mutex<RunState>) -> Result<Self, SchedulerStateError> {
        let mut current = lock(state);
        if *current == RunState::Running {
            return Err(SchedulerStateError::RunInProgress);
        }
        *current = RunState::Running;
        Ok(Self { state })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = RunState::Idle;
    }
}

struct Shared {
    reconciler: Arc<Reconciler>,
    run_state: Mutex<RunState>,
    last_report: Mutex<Option<RunReport>>,
}

impl Shared {
    async fn run_gated(&self, trigger: Trigger) -> Result<RunReport, SchedulerError> {
        let _guard = RunGuard::acquire(&self.run_state)?;
        info!(
            "event=run_trigger module=scheduler status=start trigger={}",
            trigger.as_str()
        );
        let report = self.reconciler.run_pass().await?;
        *lock(&self.last_report) = Some(report.clone());
        Ok(report)
    }
}

/// Fixed-period driver for [`Reconciler::run_pass`].
pub struct Scheduler {
    shared: Arc<Shared>,
    timer: Mutex<TimerState>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                reconciler,
                run_state: Mutex::new(RunState::Idle),
                last_report: Mutex::new(None),
            }),
            timer: Mutex::new(TimerState::Stopped),
        }
    }

    /// Starts firing a pass every `interval`; the first pass fires one
    /// interval from now.
    ///
    /// # Errors
    /// - `AlreadyRunning` when the timer is active; that timer is untouched.
    /// - `InvalidInterval` for a zero interval.
    /// - `NoRuntime` outside a tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<(), SchedulerStateError> {
        if interval.is_zero() {
            return Err(SchedulerStateError::InvalidInterval);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SchedulerStateError::NoRuntime)?;

        let mut timer = lock(&self.timer);
        if let TimerState::Ticking { task, .. } = &*timer {
            if !task.is_finished() {
                warn!("event=scheduler_start module=scheduler status=rejected reason=already_running");
                return Err(SchedulerStateError::AlreadyRunning);
            }
        }

        let cancel = CancellationToken::new();
        let task = runtime.spawn(tick_loop(
            Arc::clone(&self.shared),
            interval,
            cancel.clone(),
        ));
        *timer = TimerState::Ticking { cancel, task };
        info!(
            "event=scheduler_start module=scheduler status=ok interval_secs={}",
            interval.as_secs()
        );
        Ok(())
    }

    /// Halts future ticks and waits for an in-flight pass to finish.
    ///
    /// Calling this while stopped is a no-op.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.timer), TimerState::Stopped);
        let TimerState::Ticking { cancel, task } = previous else {
            return;
        };

        cancel.cancel();
        if let Err(err) = task.await {
            if err.is_panic() {
                error!("event=scheduler_stop module=scheduler status=error error=timer_task_panicked");
                return;
            }
        }
        info!("event=scheduler_stop module=scheduler status=ok");
    }

    /// Runs exactly one pass now, independent of the timer.
    ///
    /// # Errors
    /// - `SchedulerStateError::RunInProgress` when another pass is executing.
    /// - `RunError` when the pass could not load its subscriptions.
    pub async fn run_once(&self) -> Result<RunReport, SchedulerError> {
        self.shared.run_gated(Trigger::Manual).await
    }

    /// Whether the periodic timer is active.
    pub fn is_running(&self) -> bool {
        match &*lock(&self.timer) {
            TimerState::Ticking { task, .. } => !task.is_finished(),
            TimerState::Stopped => false,
        }
    }

    pub fn run_state(&self) -> RunState {
        *lock(&self.shared.run_state)
    }

    /// Report of the most recent pass that completed.
    pub fn last_report(&self) -> Option<RunReport> {
        lock(&self.shared.last_report).clone()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let TimerState::Ticking { cancel, .. } = &*lock(&self.timer) {
            cancel.cancel();
        }
    }
}

async fn tick_loop(shared: Arc<Shared>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match shared.run_gated(Trigger::Timer).await {
            Ok(_) => {}
            Err(SchedulerError::State(SchedulerStateError::RunInProgress)) => {
                warn!("event=run_trigger module=scheduler status=skipped trigger=timer reason=run_in_progress");
            }
            // The pass already logged its own failure; the next tick retries.
            Err(_) => {}
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
