//! Staged progress reporting and cooperative cancellation.
//!
//! Every long-running operation (loading a project, exporting, processing) reports
//! through a [`ProgressMonitor`]. Monitors are composed explicitly:
//!
//! - [`MultiMonitor`] fans every call out to a list of sinks
//! - [`StageOffset`] shifts stage indices for an inner operation that runs after a prefix phase
//! - [`ProgressTracker`] is the UI facing sink that validates call order and holds the
//!   user's cancellation request
//! - [`LogMonitor`] mirrors progress into the `log` facade
//!
//! # Lifecycle
//!
//! For a single operation the calls are strictly ordered:
//!
//! 1. `start()`, or `try_start()` when the chain may be shared
//! 2. any number of `set_stage_count`, `set_stage`, `set_max_progress`, `set_progress`
//! 3. exactly one of `complete()`, `fail(..)` or `cancel_complete(..)`
//!
//! # Cancellation
//!
//! Cancellation is never asynchronous. The operation polls
//! [`ProgressMonitor::allow_user_cancellation`] at points where it is safe to stop and
//! propagates the returned [`Cancelled`] with `?` until it reaches the frame that owns the
//! operation. That frame drops whatever it built and calls `cancel_complete`.

mod compose;
mod tracker;

pub use compose::{MultiMonitor, StageOffset};
pub use tracker::{LogMonitor, ProgressPhase, ProgressSnapshot, ProgressTracker};

use std::sync::Arc;

/// Control-flow signal raised by [`ProgressMonitor::allow_user_cancellation`].
///
/// This is not a failure. Owners of an operation translate it into
/// [`ProgressMonitor::cancel_complete`] and report it as "stopped".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled by user")]
pub struct Cancelled;

/// Admission-control outcome: another operation still owns the monitor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("another operation is still in progress")]
pub struct Conflict;

/// Observer of a multi-stage, cancellable operation.
///
/// All methods take `&self` because the same chain is shared between the thread
/// running the operation and the thread rendering the UI.
pub trait ProgressMonitor: Send + Sync {
    /// Enter the started state and reset counters.
    fn start(&self);

    /// Human readable name of the running process. Cosmetic.
    fn set_process_name(&self, name: &str);

    /// Declare the total number of stages.
    fn set_stage_count(&self, count: usize);

    /// Advance to `stage`. Progress within the stage resets to zero.
    fn set_stage(&self, stage: usize, message: &str);

    /// Denominator for subsequent [`set_progress`](Self::set_progress) calls.
    fn set_max_progress(&self, max: f64);

    /// Fractional progress inside the current stage, `0 <= progress <= max`.
    fn set_progress(&self, progress: f64, message: &str);

    /// Safe checkpoint. Returns `Err(Cancelled)` if the user asked to stop.
    fn allow_user_cancellation(&self) -> Result<(), Cancelled>;

    fn complete(&self);

    fn fail(&self, error: &anyhow::Error);

    fn cancel_complete(&self, cancelled: Cancelled);

    /// `true` if another operation already owns this chain.
    fn is_conflicting_process(&self) -> bool;

    /// Start unless another operation owns this chain.
    ///
    /// Sinks that track ownership check and start under one lock, so of two callers
    /// racing for the same chain exactly one is admitted.
    fn try_start(&self) -> Result<(), Conflict> {
        if self.is_conflicting_process() {
            return Err(Conflict);
        }
        self.start();
        Ok(())
    }
}

impl<M: ProgressMonitor + ?Sized> ProgressMonitor for Arc<M> {
    fn start(&self) {
        (**self).start()
    }

    fn set_process_name(&self, name: &str) {
        (**self).set_process_name(name)
    }

    fn set_stage_count(&self, count: usize) {
        (**self).set_stage_count(count)
    }

    fn set_stage(&self, stage: usize, message: &str) {
        (**self).set_stage(stage, message)
    }

    fn set_max_progress(&self, max: f64) {
        (**self).set_max_progress(max)
    }

    fn set_progress(&self, progress: f64, message: &str) {
        (**self).set_progress(progress, message)
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        (**self).allow_user_cancellation()
    }

    fn complete(&self) {
        (**self).complete()
    }

    fn fail(&self, error: &anyhow::Error) {
        (**self).fail(error)
    }

    fn cancel_complete(&self, cancelled: Cancelled) {
        (**self).cancel_complete(cancelled)
    }

    fn is_conflicting_process(&self) -> bool {
        (**self).is_conflicting_process()
    }

    fn try_start(&self) -> Result<(), Conflict> {
        (**self).try_start()
    }
}
