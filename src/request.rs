//! Deferred operations executed on the render thread.
//!
//! Anything that needs the loaded project ("export it", "refit its materials") is
//! queued here and run by [`RequestQueue::drain`] on the thread that owns the GPU
//! context. Operations that need an instance wait for one: they are parked as
//! instance-load callbacks and appended to the queue once a project is active.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{catch_panic, log_panic, panic_message};
use crate::instance::{Instance, InstanceManager};
use crate::progress::{Cancelled, Conflict, ProgressMonitor};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("stopped by user")]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Queued operation that reports progress.
pub trait ObservableRequest<I: Instance>: Send + 'static {
    fn execute(
        self: Box<Self>,
        gpu: &I::Gpu,
        instance: &Arc<I>,
        monitor: &dyn ProgressMonitor,
    ) -> Result<(), RequestError>;
}

impl<I, F> ObservableRequest<I> for F
where
    I: Instance,
    F: FnOnce(&I::Gpu, &Arc<I>, &dyn ProgressMonitor) -> Result<(), RequestError>
        + Send
        + 'static,
{
    fn execute(
        self: Box<Self>,
        gpu: &I::Gpu,
        instance: &Arc<I>,
        monitor: &dyn ProgressMonitor,
    ) -> Result<(), RequestError> {
        (*self)(gpu, instance, monitor)
    }
}

type DetachedOp<G> = Box<dyn FnOnce(&G) -> anyhow::Result<()> + Send>;
type InstanceOp<G, I> = Box<dyn FnOnce(&G, &Arc<I>) -> anyhow::Result<()> + Send>;

enum Operation<I: Instance> {
    Detached(DetachedOp<I::Gpu>),
    Instance(InstanceOp<I::Gpu, I>),
    Observed {
        request: Box<dyn ObservableRequest<I>>,
        monitor: Arc<dyn ProgressMonitor>,
    },
}

enum Step<I: Instance> {
    Done,
    /// No instance is active; wait for the next one.
    Waiting(Operation<I>),
    /// The monitor is owned by another operation; retry on the next drain.
    Blocked(Operation<I>),
}

/// FIFO of operations drained on the render thread.
///
/// The operation at the head stays in the queue while it runs, so `is_empty` never
/// reports an empty queue while something is executing.
pub struct RequestQueue<I: Instance> {
    manager: Arc<InstanceManager<I>>,
    /// `None` marks the head while it executes.
    entries: Mutex<VecDeque<Option<Operation<I>>>>,
    draining: AtomicBool,
}

impl<I: Instance> RequestQueue<I> {
    pub fn new(manager: Arc<InstanceManager<I>>) -> Self {
        Self {
            manager,
            entries: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &Arc<InstanceManager<I>> {
        &self.manager
    }

    /// Queue an operation that runs against the active instance.
    pub fn enqueue<F>(self: &Arc<Self>, operation: F)
    where
        F: FnOnce(&I::Gpu, &Arc<I>) -> anyhow::Result<()> + Send + 'static,
    {
        self.defer(Operation::Instance(Box::new(operation)));
    }

    /// Queue an operation that does not need an instance.
    pub fn enqueue_detached<F>(&self, operation: F)
    where
        F: FnOnce(&I::Gpu) -> anyhow::Result<()> + Send + 'static,
    {
        self.push(Operation::Detached(Box::new(operation)));
    }

    /// Queue a monitored operation that runs against the active instance.
    ///
    /// Rejected if `monitor` is owned by another operation right now. The monitor is
    /// started when the operation runs, not when it is queued.
    pub fn enqueue_observed<R>(
        self: &Arc<Self>,
        request: R,
        monitor: Arc<dyn ProgressMonitor>,
    ) -> Result<(), Conflict>
    where
        R: ObservableRequest<I>,
    {
        if monitor.is_conflicting_process() {
            log::warn!("Not queueing operation: another operation is in progress");
            return Err(Conflict);
        }
        self.defer(Operation::Observed {
            request: Box::new(request),
            monitor,
        });
        Ok(())
    }

    fn push(&self, operation: Operation<I>) {
        self.entries.lock().push_back(Some(operation));
    }

    /// Append `operation` now if an instance is active, otherwise once one is.
    fn defer(self: &Arc<Self>, operation: Operation<I>) {
        let queue: Weak<Self> = Arc::downgrade(self);
        self.manager.when_active(move |_| {
            if let Some(queue) = queue.upgrade() {
                queue.push(operation);
            }
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Run queued operations in order until the queue is empty.
    ///
    /// Operations queued while draining run in the same call. Calling `drain` from
    /// inside an operation does nothing. Returns the number of operations executed.
    pub fn drain(self: &Arc<Self>, gpu: &I::Gpu) -> usize {
        if self.draining.swap(true, Ordering::SeqCst) {
            log::debug!("Ignoring re-entrant drain");
            return 0;
        }
        let _draining = DrainGuard(&self.draining);

        let mut executed = 0;
        loop {
            let head = {
                let mut entries = self.entries.lock();
                match entries.front_mut() {
                    Some(slot) => slot.take(),
                    None => break,
                }
            };
            // An empty head slot is left over from a drain that unwound.
            let Some(operation) = head else {
                self.entries.lock().pop_front();
                continue;
            };

            let step = panic::catch_unwind(AssertUnwindSafe(|| self.run(gpu, operation)))
                .unwrap_or_else(|payload| {
                    log::error!(
                        "Queued operation panicked: {}",
                        panic_message(&*payload)
                    );
                    Step::Done
                });
            match step {
                Step::Done => {
                    self.entries.lock().pop_front();
                    executed += 1;
                }
                Step::Waiting(operation) => {
                    self.entries.lock().pop_front();
                    log::debug!("No project is active; queued operation waits for the next one");
                    self.defer(operation);
                }
                Step::Blocked(operation) => {
                    if let Some(slot) = self.entries.lock().front_mut() {
                        *slot = Some(operation);
                    }
                    break;
                }
            }
        }
        executed
    }

    fn run(&self, gpu: &I::Gpu, operation: Operation<I>) -> Step<I> {
        match operation {
            Operation::Detached(operation) => {
                if let Err(error) = catch_panic("Queued operation", || operation(gpu)) {
                    log::error!("Queued operation failed: {:#}", error);
                }
                Step::Done
            }
            Operation::Instance(operation) => {
                let Some(instance) = self.manager.active() else {
                    return Step::Waiting(Operation::Instance(operation));
                };
                if let Err(error) = catch_panic("Queued operation", || operation(gpu, &instance)) {
                    log::error!("Queued operation failed: {:#}", error);
                }
                Step::Done
            }
            Operation::Observed { request, monitor } => {
                let Some(instance) = self.manager.active() else {
                    return Step::Waiting(Operation::Observed { request, monitor });
                };
                if monitor.try_start().is_err() {
                    return Step::Blocked(Operation::Observed { request, monitor });
                }

                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    request.execute(gpu, &instance, &*monitor)
                }))
                .unwrap_or_else(|payload| {
                    Err(RequestError::Failed(anyhow::anyhow!(
                        "Queued operation panicked: {}",
                        panic_message(&*payload)
                    )))
                });

                match result {
                    Ok(()) => log_panic("Progress monitor", || monitor.complete()),
                    Err(RequestError::Cancelled(cancelled)) => {
                        log::info!("Queued operation stopped by user");
                        log_panic("Progress monitor", || monitor.cancel_complete(cancelled));
                    }
                    Err(RequestError::Failed(error)) => {
                        log::error!("Queued operation failed: {:#}", error);
                        log_panic("Progress monitor", || monitor.fail(&error));
                    }
                }
                Step::Done
            }
        }
    }
}

/// Clears the draining flag even if a drain unwinds.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
