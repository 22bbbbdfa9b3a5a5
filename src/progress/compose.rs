use std::sync::Arc;

use parking_lot::Mutex;

use super::{Cancelled, Conflict, ProgressMonitor};

/// Fans one operation out to several sinks, in registration order.
///
/// Used when more than one surface observes the same operation, e.g. the window
/// title and the log.
#[derive(Default)]
pub struct MultiMonitor {
    sinks: Vec<Arc<dyn ProgressMonitor>>,
    /// Held across the conflict check and the start of every sink.
    admission: Mutex<()>,
}

impl MultiMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressMonitor>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn ProgressMonitor>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressMonitor for MultiMonitor {
    fn start(&self) {
        self.sinks.iter().for_each(|sink| sink.start());
    }

    fn set_process_name(&self, name: &str) {
        self.sinks.iter().for_each(|sink| sink.set_process_name(name));
    }

    fn set_stage_count(&self, count: usize) {
        self.sinks.iter().for_each(|sink| sink.set_stage_count(count));
    }

    fn set_stage(&self, stage: usize, message: &str) {
        self.sinks.iter().for_each(|sink| sink.set_stage(stage, message));
    }

    fn set_max_progress(&self, max: f64) {
        self.sinks.iter().for_each(|sink| sink.set_max_progress(max));
    }

    fn set_progress(&self, progress: f64, message: &str) {
        self.sinks
            .iter()
            .for_each(|sink| sink.set_progress(progress, message));
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        // Every sink is polled so each one gets to consume its pending request.
        let cancelled = self
            .sinks
            .iter()
            .map(|sink| sink.allow_user_cancellation().is_err())
            .fold(false, |acc, cancelled| acc | cancelled);
        if cancelled { Err(Cancelled) } else { Ok(()) }
    }

    fn complete(&self) {
        self.sinks.iter().for_each(|sink| sink.complete());
    }

    fn fail(&self, error: &anyhow::Error) {
        self.sinks.iter().for_each(|sink| sink.fail(error));
    }

    fn cancel_complete(&self, cancelled: Cancelled) {
        self.sinks
            .iter()
            .for_each(|sink| sink.cancel_complete(cancelled));
    }

    fn is_conflicting_process(&self) -> bool {
        self.sinks.iter().any(|sink| sink.is_conflicting_process())
    }

    fn try_start(&self) -> Result<(), Conflict> {
        let _admission = self.admission.lock();
        if self.is_conflicting_process() {
            return Err(Conflict);
        }
        self.start();
        Ok(())
    }
}

type Finalizer = Box<dyn FnOnce() + Send>;

/// Shifts stage indices of an inner operation by a constant offset.
///
/// A prefix phase (preview generation during a load, for instance) already used the
/// first stages of the chain. The inner operation still counts its stages from zero,
/// so `set_stage(i)` is forwarded as `set_stage(i + offset)` and `set_stage_count(n)`
/// as `set_stage_count(n + offset)`.
///
/// The chain was started by the prefix phase, so the inner `start()` is swallowed.
/// An optional finalizer runs on `complete()` before it is forwarded.
pub struct StageOffset {
    inner: Arc<dyn ProgressMonitor>,
    offset: usize,
    finalizer: Mutex<Option<Finalizer>>,
}

impl StageOffset {
    pub fn new(inner: Arc<dyn ProgressMonitor>, offset: usize) -> Self {
        Self {
            inner,
            offset,
            finalizer: Mutex::new(None),
        }
    }

    /// Run `finalizer` once, right before `complete()` reaches the inner chain.
    pub fn with_finalizer(self, finalizer: impl FnOnce() + Send + 'static) -> Self {
        *self.finalizer.lock() = Some(Box::new(finalizer));
        self
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl ProgressMonitor for StageOffset {
    fn start(&self) {}

    fn set_process_name(&self, name: &str) {
        self.inner.set_process_name(name);
    }

    fn set_stage_count(&self, count: usize) {
        self.inner.set_stage_count(count + self.offset);
    }

    fn set_stage(&self, stage: usize, message: &str) {
        self.inner.set_stage(stage + self.offset, message);
    }

    fn set_max_progress(&self, max: f64) {
        self.inner.set_max_progress(max);
    }

    fn set_progress(&self, progress: f64, message: &str) {
        self.inner.set_progress(progress, message);
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        self.inner.allow_user_cancellation()
    }

    fn complete(&self) {
        let finalizer = self.finalizer.lock().take();
        if let Some(finalizer) = finalizer {
            finalizer();
        }
        self.inner.complete();
    }

    fn fail(&self, error: &anyhow::Error) {
        self.inner.fail(error);
    }

    fn cancel_complete(&self, cancelled: Cancelled) {
        self.inner.cancel_complete(cancelled);
    }

    fn is_conflicting_process(&self) -> bool {
        self.inner.is_conflicting_process()
    }

    /// The prefix phase already owns the chain.
    fn try_start(&self) -> Result<(), Conflict> {
        Ok(())
    }
}
