//! Lifecycle of the active project.
//!
//! A project is loaded on the tokio blocking pool, parked in a single pending slot and
//! picked up by [`InstanceManager::update`] on the render thread, which initializes its
//! GPU resources and swaps it in. Rendering of the previous project continues
//! undisturbed until that swap.
//!
//! ```text
//! load() ──spawn_blocking──▶ open ─▶ previews ─▶ build ─▶ pending slot
//!                                                              │
//! render tick: update() ◀──────────────────────────────────────┘
//!              initialize ─▶ swap ─▶ retire previous ─▶ instance callbacks
//! ```

mod loader;
mod mailbox;

pub use loader::{InstanceBuilder, LoadError, LoadOptions, ProjectLoader, SourceDescriptor};
pub use mailbox::Mailbox;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{catch_panic, log_panic, panic_message};
use crate::progress::{Cancelled, Conflict, ProgressMonitor, StageOffset};
use crate::scene::SceneState;
use crate::view_set::ViewSet;
use crate::viewport::{CameraViewport, Framebuffer, TileSize, draw_in_subdivisions};

/// A loaded project that can draw itself.
///
/// Created on a background thread by an [`InstanceBuilder`], then initialized, drawn
/// and closed on the render thread only. An instance that was never initialized owns
/// no GPU resources and may simply be dropped.
pub trait Instance: Send + Sync + 'static {
    /// GPU context the instance creates its resources with.
    type Gpu: ?Sized;
    /// Framebuffer the instance draws into.
    type Target: Framebuffer + ?Sized;

    fn initialize(&mut self, gpu: &Self::Gpu) -> anyhow::Result<()>;

    /// Draw one tile. `viewport` already carries the tile's crop.
    fn draw(
        &self,
        gpu: &Self::Gpu,
        target: &mut Self::Target,
        viewport: &CameraViewport,
    ) -> anyhow::Result<()>;

    /// Release GPU resources.
    fn close(self, gpu: &Self::Gpu) -> anyhow::Result<()>
    where
        Self: Sized;

    fn view_set(&self) -> &Arc<ViewSet>;

    /// Whether materials have been fitted for this project.
    fn is_processed(&self) -> bool;
}

pub type InstanceCallback<I> = Box<dyn FnOnce(&Arc<I>) + Send>;
pub type ViewSetCallback = Box<dyn FnOnce(&Arc<ViewSet>) + Send>;

/// How a background load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Waiting in the pending slot for the next [`InstanceManager::update`].
    Published,
    /// A newer load or an unload was requested while this one was running.
    Superseded,
    Cancelled,
    Failed,
}

/// Tracks one background load.
pub struct LoadHandle {
    generation: u64,
    task: JoinHandle<LoadOutcome>,
}

impl LoadHandle {
    /// Sequence number of the load. Later requests have larger numbers.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the background part of the load.
    pub async fn outcome(self) -> LoadOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("Load task #{} did not finish: {}", self.generation, error);
                LoadOutcome::Failed
            }
        }
    }
}

struct Pending<I> {
    generation: u64,
    instance: I,
    monitor: Arc<dyn ProgressMonitor>,
}

/// Owns the active instance and hands new ones over to the render thread.
///
/// `update`, `draw` and `shutdown` must only be called from the thread owning the GPU
/// context. Everything else may be called from anywhere.
pub struct InstanceManager<I: Instance> {
    runtime: Handle,
    scene: Arc<dyn SceneState>,
    pending: Mutex<Option<Pending<I>>>,
    active: RwLock<Option<Arc<I>>>,
    /// Superseded or unloaded instances waiting for their last user to let go.
    retired: Mutex<Vec<Arc<I>>>,
    unload_requested: AtomicBool,
    generation: AtomicU64,
    instance_callbacks: Mailbox<InstanceCallback<I>>,
    view_set_callbacks: Mailbox<ViewSetCallback>,
}

impl<I: Instance> InstanceManager<I> {
    pub fn new(runtime: Handle, scene: Arc<dyn SceneState>) -> Self {
        Self {
            runtime,
            scene,
            pending: Mutex::new(None),
            active: RwLock::new(None),
            retired: Mutex::new(Vec::new()),
            unload_requested: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            instance_callbacks: Mailbox::new(),
            view_set_callbacks: Mailbox::new(),
        }
    }

    /// Start loading a project in the background.
    ///
    /// Rejected with [`Conflict`] if `monitor` is still owned by another operation.
    /// Only the most recently requested load may become active; older loads that
    /// finish later report themselves as stopped.
    pub fn load<L>(
        self: &Arc<Self>,
        loader: Arc<L>,
        source: SourceDescriptor,
        options: LoadOptions,
        monitor: Arc<dyn ProgressMonitor>,
    ) -> Result<LoadHandle, Conflict>
    where
        L: ProjectLoader,
        L::Builder: InstanceBuilder<Instance = I>,
    {
        self.load_watching(loader, source, options, monitor, |_| {})
    }

    /// Like [`load`](Self::load), and fire `on_view_set` once this load has parsed
    /// its view set. A refused load drops the callback unfired.
    pub fn load_watching<L>(
        self: &Arc<Self>,
        loader: Arc<L>,
        source: SourceDescriptor,
        options: LoadOptions,
        monitor: Arc<dyn ProgressMonitor>,
        on_view_set: impl FnOnce(&Arc<ViewSet>) + Send + 'static,
    ) -> Result<LoadHandle, Conflict>
    where
        L: ProjectLoader,
        L::Builder: InstanceBuilder<Instance = I>,
    {
        if monitor.try_start().is_err() {
            log::warn!(
                "Not loading {:?}: another operation is in progress",
                source.view_set
            );
            return Err(Conflict);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        monitor.set_process_name("Loading project");
        log::info!("Loading project #{} from {:?}", generation, source.view_set);

        let manager = Arc::clone(self);
        let on_view_set: ViewSetCallback = Box::new(on_view_set);
        let task = self.runtime.spawn_blocking(move || {
            let built = panic::catch_unwind(AssertUnwindSafe(|| {
                manager.build_instance(&*loader, &source, &options, &monitor, on_view_set)
            }))
            .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(&*payload))));
            manager.publish(generation, built, monitor)
        });

        Ok(LoadHandle { generation, task })
    }

    fn build_instance<L>(
        &self,
        loader: &L,
        source: &SourceDescriptor,
        options: &LoadOptions,
        monitor: &Arc<dyn ProgressMonitor>,
        on_view_set: ViewSetCallback,
    ) -> Result<I, LoadError>
    where
        L: ProjectLoader,
        L::Builder: InstanceBuilder<Instance = I>,
    {
        let mut builder = loader.open(source, options, &**monitor)?;

        let view_set = builder.view_set();
        on_view_set(&view_set);
        for callback in self.view_set_callbacks.drain() {
            callback(&view_set);
        }
        monitor.allow_user_cancellation()?;

        monitor.set_stage_count(1);
        monitor.set_stage(0, "Generating previews");
        builder.generate_previews(&**monitor)?;
        monitor.allow_user_cancellation()?;

        let offset = StageOffset::new(Arc::clone(monitor), 1);
        let instance = builder.build(&offset)?;
        monitor.allow_user_cancellation()?;
        Ok(instance)
    }

    fn publish(
        &self,
        generation: u64,
        built: Result<I, LoadError>,
        monitor: Arc<dyn ProgressMonitor>,
    ) -> LoadOutcome {
        match built {
            Ok(instance) => {
                let mut pending = self.pending.lock();
                if self.generation.load(Ordering::SeqCst) != generation {
                    drop(pending);
                    log::info!("Discarding project load #{}: superseded", generation);
                    monitor.cancel_complete(Cancelled);
                    return LoadOutcome::Superseded;
                }
                let previous = pending.replace(Pending {
                    generation,
                    instance,
                    monitor,
                });
                drop(pending);
                if let Some(previous) = previous {
                    log::info!(
                        "Project load #{} replaced pending load #{}",
                        generation,
                        previous.generation
                    );
                    previous.monitor.cancel_complete(Cancelled);
                }
                LoadOutcome::Published
            }
            Err(LoadError::Cancelled(cancelled)) => {
                log::info!("Project load #{} stopped by user", generation);
                monitor.cancel_complete(cancelled);
                LoadOutcome::Cancelled
            }
            Err(error) => {
                let error = anyhow::Error::new(error);
                log::error!("Project load #{} failed: {:#}", generation, error);
                monitor.fail(&error);
                LoadOutcome::Failed
            }
        }
    }

    /// Release the active instance on the next [`update`](Self::update).
    ///
    /// Loads still running are superseded and a pending one is dropped.
    pub fn unload(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending.lock().take();
        if let Some(pending) = pending {
            log::info!("Dropping pending project load #{}", pending.generation);
            pending.monitor.cancel_complete(Cancelled);
        }
        self.unload_requested.store(true, Ordering::SeqCst);
    }

    /// Render-thread tick.
    ///
    /// Processes a requested unload or activates a pending instance, then closes
    /// retired instances nobody holds anymore. Never panics past its caller.
    pub fn update(&self, gpu: &I::Gpu) {
        if self.unload_requested.swap(false, Ordering::SeqCst) {
            let previous = self.active.write().take();
            if let Some(previous) = previous {
                self.retired.lock().push(previous);
                log::info!("Project unloaded");
            }
            self.scene.set_project_loaded(false);
            self.scene.set_model_size(0.0);
            self.scene.set_processed(false);
        } else {
            let pending = self.pending.lock().take();
            if let Some(pending) = pending {
                self.activate(gpu, pending);
            }
        }
        self.close_retired(gpu);
    }

    fn activate(&self, gpu: &I::Gpu, pending: Pending<I>) {
        let Pending {
            generation,
            mut instance,
            monitor,
        } = pending;

        // A stop requested after the background part finished still counts.
        let checkpoint = catch_panic("Progress monitor", || Ok(monitor.allow_user_cancellation()))
            .unwrap_or_else(|error| {
                log::error!("{:#}", error);
                Ok(())
            });
        if let Err(cancelled) = checkpoint {
            log::info!("Project load #{} stopped by user before activation", generation);
            log_panic("Progress monitor", || monitor.cancel_complete(cancelled));
            return;
        }

        if let Err(error) = catch_panic("Instance initialization", || instance.initialize(gpu)) {
            let error = anyhow::Error::new(LoadError::Initialize(error));
            log::error!("Project load #{} failed: {:#}", generation, error);
            if let Err(close_error) = catch_panic("Closing a failed instance", move || instance.close(gpu)) {
                log::warn!("Cleanup after failed initialization: {:#}", close_error);
            }
            log_panic("Progress monitor", || monitor.fail(&error));
            return;
        }

        let instance = Arc::new(instance);
        let previous = self.active.write().replace(Arc::clone(&instance));
        if let Some(previous) = previous {
            self.retired.lock().push(previous);
        }

        self.scene.set_project_loaded(true);
        self.scene.set_model_size(instance.view_set().bounding_radius());
        self.scene.set_processed(instance.is_processed());
        log::info!(
            "Project #{} active with {} cameras",
            generation,
            instance.view_set().cameras.len()
        );
        log_panic("Progress monitor", || monitor.complete());

        for callback in self.instance_callbacks.drain() {
            log_panic("Instance load callback", || callback(&instance));
        }
    }

    fn close_retired(&self, gpu: &I::Gpu) {
        let retired = std::mem::take(&mut *self.retired.lock());
        if retired.is_empty() {
            return;
        }
        let mut held = Vec::new();
        for instance in retired {
            match Arc::try_unwrap(instance) {
                Ok(instance) => {
                    match catch_panic("Closing an instance", move || instance.close(gpu)) {
                        Ok(()) => log::debug!("Closed retired instance"),
                        Err(error) => log::error!("{:#}", error),
                    }
                }
                Err(instance) => held.push(instance),
            }
        }
        if !held.is_empty() {
            log::debug!("{} retired instance(s) still in use", held.len());
            self.retired.lock().extend(held);
        }
    }

    /// Draw the active instance in tiles. Returns `false` if nothing is loaded.
    pub fn draw(
        &self,
        gpu: &I::Gpu,
        target: &mut I::Target,
        viewport: &CameraViewport,
        tile: TileSize,
    ) -> anyhow::Result<bool> {
        let Some(instance) = self.active() else {
            return Ok(false);
        };
        draw_in_subdivisions(target, tile, viewport, |target, tile_viewport| {
            instance.draw(gpu, target, tile_viewport)
        })?;
        Ok(true)
    }

    /// Close every instance. Instances still held elsewhere are leaked with a warning.
    pub fn shutdown(&self, gpu: &I::Gpu) {
        self.unload();
        self.update(gpu);
        let leaked = self.retired.lock().len();
        if leaked > 0 {
            log::warn!("{} instance(s) still in use at shutdown", leaked);
        }
    }

    pub fn active(&self) -> Option<Arc<I>> {
        self.active.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Number of background loads requested so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fire `callback` once, after the next instance becomes active.
    pub fn add_instance_load_callback(&self, callback: impl FnOnce(&Arc<I>) + Send + 'static) {
        self.instance_callbacks.post(Box::new(callback));
    }

    /// Fire `callback` once, as soon as the next load has parsed its view set.
    ///
    /// Runs on the loading thread.
    pub fn add_view_set_load_callback(
        &self,
        callback: impl FnOnce(&Arc<ViewSet>) + Send + 'static,
    ) {
        self.view_set_callbacks.post(Box::new(callback));
    }

    /// Run `callback` now if an instance is active, otherwise once one becomes active.
    pub fn when_active(&self, callback: impl FnOnce(&Arc<I>) + Send + 'static) {
        let posted = self
            .instance_callbacks
            .post_unless(Box::new(callback) as InstanceCallback<I>, || self.active());
        if let Err((callback, instance)) = posted {
            callback(&instance);
        }
    }
}
