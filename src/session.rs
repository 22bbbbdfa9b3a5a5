//! Application context tying the instance manager, request queue and progress chain
//! together.
//!
//! One [`Session`] is created at startup and passed around explicitly. Every user
//! facing operation (load, export) reports through the same monitor chain: a
//! [`ProgressTracker`] for the UI and a [`LogMonitor`], so the tracker's admission check
//! keeps two operations from interleaving.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::export::{ExportRequest, ExportSettings, Exporter};
use crate::instance::{
    Instance, InstanceBuilder, InstanceManager, LoadHandle, LoadOptions, ProjectLoader,
    SourceDescriptor,
};
use crate::progress::{
    Conflict, LogMonitor, MultiMonitor, ProgressMonitor, ProgressSnapshot, ProgressTracker,
};
use crate::request::RequestQueue;
use crate::scene::SceneFlags;
use crate::view_set::ViewSet;
use crate::viewport::{CameraViewport, TileSize};

/// Instance type produced by a loader.
pub type InstanceOf<L> = <<L as ProjectLoader>::Builder as InstanceBuilder>::Instance;

pub struct Session<L: ProjectLoader> {
    loader: Arc<L>,
    options: LoadOptions,
    manager: Arc<InstanceManager<InstanceOf<L>>>,
    queue: Arc<RequestQueue<InstanceOf<L>>>,
    tracker: Arc<ProgressTracker>,
    monitor: Arc<dyn ProgressMonitor>,
    scene: Arc<SceneFlags>,
    last_source: Mutex<Option<SourceDescriptor>>,
}

impl<L: ProjectLoader> Session<L> {
    pub fn new(runtime: Handle, loader: L, options: LoadOptions) -> Self {
        let scene = Arc::new(SceneFlags::new());
        let manager = Arc::new(InstanceManager::new(runtime, scene.clone()));
        let queue = Arc::new(RequestQueue::new(Arc::clone(&manager)));
        let tracker = Arc::new(ProgressTracker::new());
        let monitor: Arc<dyn ProgressMonitor> = Arc::new(
            MultiMonitor::new()
                .with(tracker.clone())
                .with(Arc::new(LogMonitor::new())),
        );
        Self {
            loader: Arc::new(loader),
            options,
            manager,
            queue,
            tracker,
            monitor,
            scene,
            last_source: Mutex::new(None),
        }
    }

    pub fn load_project(&self, source: SourceDescriptor) -> Result<LoadHandle, Conflict> {
        self.load_project_watching(source, |_| {})
    }

    /// Load `source` and fire `on_view_set` once its view set is parsed.
    ///
    /// The callback belongs to this load only; it is dropped if the load is refused.
    pub fn load_project_watching(
        &self,
        source: SourceDescriptor,
        on_view_set: impl FnOnce(&Arc<ViewSet>) + Send + 'static,
    ) -> Result<LoadHandle, Conflict> {
        let handle = self.manager.load_watching(
            Arc::clone(&self.loader),
            source.clone(),
            self.options.clone(),
            Arc::clone(&self.monitor),
            on_view_set,
        )?;
        *self.last_source.lock() = Some(source);
        Ok(handle)
    }

    /// Load the most recently loaded source again. `None` if nothing was loaded yet.
    pub fn reload(&self) -> Option<Result<LoadHandle, Conflict>> {
        self.reload_watching(|_| {})
    }

    pub fn reload_watching(
        &self,
        on_view_set: impl FnOnce(&Arc<ViewSet>) + Send + 'static,
    ) -> Option<Result<LoadHandle, Conflict>> {
        let source = self.last_source.lock().clone()?;
        Some(self.load_project_watching(source, on_view_set))
    }

    pub fn unload(&self) {
        self.manager.unload();
    }

    /// Queue an export of the active project.
    pub fn export<E>(
        &self,
        exporter: Arc<E>,
        output: impl Into<PathBuf>,
        settings: ExportSettings,
    ) -> Result<(), Conflict>
    where
        E: Exporter<InstanceOf<L>>,
    {
        self.queue.enqueue_observed(
            ExportRequest::new(exporter, output, settings),
            Arc::clone(&self.monitor),
        )
    }

    /// Ask the running operation to stop. Returns `false` if nothing is running.
    pub fn cancel(&self) -> bool {
        self.tracker.request_cancellation()
    }

    /// Render-thread tick: hand over loaded instances, then run queued operations.
    pub fn tick(&self, gpu: &<InstanceOf<L> as Instance>::Gpu) -> usize {
        self.manager.update(gpu);
        self.queue.drain(gpu)
    }

    pub fn draw(
        &self,
        gpu: &<InstanceOf<L> as Instance>::Gpu,
        target: &mut <InstanceOf<L> as Instance>::Target,
        viewport: &CameraViewport,
        tile: TileSize,
    ) -> anyhow::Result<bool> {
        self.manager.draw(gpu, target, viewport, tile)
    }

    pub fn shutdown(&self, gpu: &<InstanceOf<L> as Instance>::Gpu) {
        self.queue.drain(gpu);
        self.manager.shutdown(gpu);
    }

    pub fn status(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    pub fn manager(&self) -> &Arc<InstanceManager<InstanceOf<L>>> {
        &self.manager
    }

    pub fn queue(&self) -> &Arc<RequestQueue<InstanceOf<L>>> {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn monitor(&self) -> &Arc<dyn ProgressMonitor> {
        &self.monitor
    }

    pub fn scene(&self) -> &Arc<SceneFlags> {
        &self.scene
    }
}
