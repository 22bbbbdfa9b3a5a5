use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{Cancelled, Conflict, ProgressMonitor};

/// Where an operation observed by a [`ProgressTracker`] currently stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProgressPhase {
    #[default]
    Idle,
    Started,
    Completed,
    Failed(String),
    Cancelled,
}

impl ProgressPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressPhase::Completed | ProgressPhase::Failed(_) | ProgressPhase::Cancelled
        )
    }
}

/// Copy of the tracker state, cheap enough to take once per frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressSnapshot {
    pub phase: ProgressPhase,
    pub process_name: String,
    pub stage: usize,
    pub stage_count: usize,
    pub progress: f64,
    pub max_progress: f64,
    pub message: String,
}

impl ProgressSnapshot {
    pub fn is_running(&self) -> bool {
        self.phase == ProgressPhase::Started
    }

    /// Progress inside the current stage in `[0, 1]`, if a maximum was declared.
    pub fn stage_fraction(&self) -> Option<f64> {
        (self.max_progress > 0.0).then(|| (self.progress / self.max_progress).clamp(0.0, 1.0))
    }

    /// Progress over all stages in `[0, 1]`, if a stage count was declared.
    pub fn overall_fraction(&self) -> Option<f64> {
        if self.stage_count == 0 {
            return None;
        }
        let within = self.stage_fraction().unwrap_or(0.0);
        Some(((self.stage as f64 + within) / self.stage_count as f64).clamp(0.0, 1.0))
    }

    /// One line status text, e.g. for a window title.
    pub fn summary(&self) -> String {
        match &self.phase {
            ProgressPhase::Idle => String::new(),
            ProgressPhase::Started => {
                let percent = self
                    .overall_fraction()
                    .map(|f| format!(" {:.0}%", f * 100.0))
                    .unwrap_or_default();
                let stage = if self.stage_count > 0 {
                    format!(" [{}/{}]", (self.stage + 1).min(self.stage_count), self.stage_count)
                } else {
                    String::new()
                };
                format!("{}{}{} {}", self.process_name, stage, percent, self.message)
                    .trim_end()
                    .to_string()
            }
            ProgressPhase::Completed => format!("{}: done", self.process_name),
            ProgressPhase::Failed(error) => format!("{}: failed: {}", self.process_name, error),
            ProgressPhase::Cancelled => format!("{}: stopped", self.process_name),
        }
    }
}

/// UI facing terminal sink.
///
/// Tracks the state machine of the operation that currently owns it, ignores (and
/// logs) calls that arrive out of order, and carries the user's cancellation request
/// until the next checkpoint consumes it. While an operation is running the tracker
/// reports itself as conflicting so that a second operation is refused instead of
/// interleaved.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
    cancel_requested: AtomicBool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().clone()
    }

    /// Ask the running operation to stop at its next checkpoint.
    ///
    /// Returns `false` if nothing is running.
    pub fn request_cancellation(&self) -> bool {
        if self.state.lock().is_running() {
            self.cancel_requested.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn while_running(&self, call: &str, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut state = self.state.lock();
        if state.is_running() {
            f(&mut state);
        } else {
            log::warn!("Ignoring `{}` on a tracker in phase {:?}", call, state.phase);
        }
    }

    fn finish(&self, call: &str, phase: ProgressPhase) {
        self.while_running(call, |state| state.phase = phase);
        self.cancel_requested.store(false, Ordering::SeqCst);
    }
}

impl ProgressMonitor for ProgressTracker {
    fn start(&self) {
        if self.try_start().is_err() {
            log::warn!(
                "Ignoring `start` while `{}` is still running",
                self.state.lock().process_name
            );
        }
    }

    fn set_process_name(&self, name: &str) {
        self.while_running("set_process_name", |state| {
            state.process_name = name.to_string()
        });
    }

    fn set_stage_count(&self, count: usize) {
        self.while_running("set_stage_count", |state| state.stage_count = count);
    }

    fn set_stage(&self, stage: usize, message: &str) {
        self.while_running("set_stage", |state| {
            if stage > state.stage_count {
                log::warn!(
                    "Stage {} is out of range for {} stages; clamping",
                    stage,
                    state.stage_count
                );
            }
            state.stage = stage.min(state.stage_count);
            state.progress = 0.0;
            state.message = message.to_string();
        });
    }

    fn set_max_progress(&self, max: f64) {
        self.state.lock().max_progress = max.max(0.0);
    }

    fn set_progress(&self, progress: f64, message: &str) {
        self.while_running("set_progress", |state| {
            let max = if state.max_progress > 0.0 {
                state.max_progress
            } else {
                f64::MAX
            };
            state.progress = progress.clamp(0.0, max);
            state.message = message.to_string();
        });
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        if !self.state.lock().is_running() {
            return Ok(());
        }
        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn complete(&self) {
        self.finish("complete", ProgressPhase::Completed);
    }

    fn fail(&self, error: &anyhow::Error) {
        self.finish("fail", ProgressPhase::Failed(format!("{:#}", error)));
    }

    fn cancel_complete(&self, _: Cancelled) {
        self.finish("cancel_complete", ProgressPhase::Cancelled);
    }

    fn is_conflicting_process(&self) -> bool {
        self.state.lock().is_running()
    }

    fn try_start(&self) -> Result<(), Conflict> {
        let mut state = self.state.lock();
        if state.is_running() {
            return Err(Conflict);
        }
        *state = ProgressSnapshot {
            phase: ProgressPhase::Started,
            ..Default::default()
        };
        self.cancel_requested.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogState {
    process_name: String,
    stage_count: usize,
    max_progress: f64,
    last_decile: Option<u32>,
}

/// Mirrors an operation into the `log` facade.
///
/// Stages are logged at `info`, progress at `debug` in 10% steps. Cancellation is
/// logged as "stopped" rather than as an error.
#[derive(Debug, Default)]
pub struct LogMonitor {
    state: Mutex<LogState>,
}

impl LogMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressMonitor for LogMonitor {
    fn start(&self) {
        *self.state.lock() = LogState::default();
        log::debug!("Operation started");
    }

    fn set_process_name(&self, name: &str) {
        self.state.lock().process_name = name.to_string();
        log::info!("{}", name);
    }

    fn set_stage_count(&self, count: usize) {
        self.state.lock().stage_count = count;
    }

    fn set_stage(&self, stage: usize, message: &str) {
        let mut state = self.state.lock();
        state.last_decile = None;
        log::info!(
            "{} [{}/{}] {}",
            state.process_name,
            stage + 1,
            state.stage_count.max(stage + 1),
            message
        );
    }

    fn set_max_progress(&self, max: f64) {
        self.state.lock().max_progress = max;
    }

    fn set_progress(&self, progress: f64, message: &str) {
        let mut state = self.state.lock();
        if state.max_progress <= 0.0 {
            return;
        }
        let decile = ((progress / state.max_progress).clamp(0.0, 1.0) * 10.0) as u32;
        if state.last_decile != Some(decile) {
            state.last_decile = Some(decile);
            log::debug!("{} {}% {}", state.process_name, decile * 10, message);
        }
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        Ok(())
    }

    fn complete(&self) {
        log::info!("{}: done", self.state.lock().process_name);
    }

    fn fail(&self, error: &anyhow::Error) {
        log::error!("{}: failed: {:#}", self.state.lock().process_name, error);
    }

    fn cancel_complete(&self, _: Cancelled) {
        log::info!("{}: stopped by user", self.state.lock().process_name);
    }

    fn is_conflicting_process(&self) -> bool {
        false
    }
}
