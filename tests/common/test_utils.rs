use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use cgmath::{Matrix4, Point3, SquareMatrix, Vector4};
use image::{Rgba, RgbaImage};
use parking_lot::{Condvar, Mutex};
use relight::{
    instance::{
        Instance, InstanceBuilder, InstanceManager, LoadError, LoadOptions, LoadOutcome,
        ProjectLoader, SourceDescriptor,
    },
    progress::{Cancelled, ProgressMonitor},
    request::RequestQueue,
    scene::SceneFlags,
    view_set::{CameraPose, ViewSet},
    viewport::{CameraViewport, Framebuffer},
};

/// Records every call it receives, in order.
///
/// Checkpoints are counted separately; `cancel_at` makes the n-th checkpoint (1-based)
/// report a cancellation. `panic_on` makes the named call panic instead of recording.
#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<String>>,
    checkpoints: AtomicUsize,
    cancel_at: Option<usize>,
    panic_on: Option<&'static str>,
    conflicting: AtomicBool,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancelling_at(checkpoint: usize) -> Arc<Self> {
        Arc::new(Self {
            cancel_at: Some(checkpoint),
            ..Default::default()
        })
    }

    /// Panics on every event starting with `call`, e.g. `"start"` or `"complete"`.
    pub fn panicking_on(call: &'static str) -> Arc<Self> {
        Arc::new(Self {
            panic_on: Some(call),
            ..Default::default()
        })
    }

    pub fn set_conflicting(&self, conflicting: bool) {
        self.conflicting.store(conflicting, Ordering::SeqCst);
    }

    pub fn note(&self, event: impl Into<String>) {
        let event = event.into();
        if let Some(call) = self.panic_on {
            if event.starts_with(call) {
                panic!("monitor broke in `{}`", call);
            }
        }
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints.load(Ordering::SeqCst)
    }

    /// The last event, if it is one of `complete`, `fail:..` or `cancel`.
    pub fn terminal(&self) -> Option<String> {
        self.events
            .lock()
            .last()
            .filter(|event| is_terminal(event))
            .cloned()
    }

    /// `start`, then only configuration/stage/progress calls, then exactly one terminal
    /// call at the very end.
    pub fn follows_protocol(&self) -> bool {
        let events = self.events();
        let Some((first, rest)) = events.split_first() else {
            return false;
        };
        let Some((last, middle)) = rest.split_last() else {
            return false;
        };
        first == "start"
            && is_terminal(last)
            && middle.iter().all(|event| {
                ["name:", "stage_count:", "stage:", "max:", "progress:"]
                    .iter()
                    .any(|prefix| event.starts_with(prefix))
            })
    }
}

fn is_terminal(event: &str) -> bool {
    event == "complete" || event == "cancel" || event.starts_with("fail:")
}

impl ProgressMonitor for RecordingMonitor {
    fn start(&self) {
        self.note("start");
    }

    fn set_process_name(&self, name: &str) {
        self.note(format!("name:{}", name));
    }

    fn set_stage_count(&self, count: usize) {
        self.note(format!("stage_count:{}", count));
    }

    fn set_stage(&self, stage: usize, message: &str) {
        self.note(format!("stage:{}:{}", stage, message));
    }

    fn set_max_progress(&self, max: f64) {
        self.note(format!("max:{}", max));
    }

    fn set_progress(&self, progress: f64, _message: &str) {
        self.note(format!("progress:{}", progress));
    }

    fn allow_user_cancellation(&self) -> Result<(), Cancelled> {
        let checkpoint = self.checkpoints.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cancel_at == Some(checkpoint) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn complete(&self) {
        self.note("complete");
    }

    fn fail(&self, error: &anyhow::Error) {
        self.note(format!("fail:{:#}", error));
    }

    fn cancel_complete(&self, _: Cancelled) {
        self.note("cancel");
    }

    fn is_conflicting_process(&self) -> bool {
        self.conflicting.load(Ordering::SeqCst)
    }
}

/// Stand-in GPU context that records the instance lifecycle.
#[derive(Default)]
pub struct TestGpu {
    pub initialized: Mutex<Vec<u32>>,
    pub closed: Mutex<Vec<u32>>,
}

impl TestGpu {
    pub fn initialized(&self) -> Vec<u32> {
        self.initialized.lock().clone()
    }

    pub fn closed(&self) -> Vec<u32> {
        self.closed.lock().clone()
    }
}

/// CPU framebuffer counting its flushes.
pub struct ImageFramebuffer {
    pub image: RgbaImage,
    pub flushes: usize,
}

impl ImageFramebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            flushes: 0,
        }
    }
}

impl Framebuffer for ImageFramebuffer {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Draw each point as one pixel, clipped to the viewport's rectangle.
pub fn splat(
    framebuffer: &mut ImageFramebuffer,
    viewport: &CameraViewport,
    points: &[(Point3<f32>, Rgba<u8>)],
) {
    let rect = viewport.rect();
    let (width, height) = framebuffer.image.dimensions();
    for (point, colour) in points {
        let Some(pixel) = viewport.project(*point) else {
            continue;
        };
        if pixel.x < 0.0 || pixel.y < 0.0 {
            continue;
        }
        let (x, y) = (pixel.x.floor() as u32, pixel.y.floor() as u32);
        if rect.contains(x, y) && x < width && y < height {
            framebuffer.image.put_pixel(x, y, *colour);
        }
    }
}

/// World-space point that projects to the centre of pixel (`x`, `y`) of `viewport`.
pub fn unproject_pixel_centre(viewport: &CameraViewport, x: u32, y: u32) -> Point3<f32> {
    let rect = viewport.rect();
    let ndc_x = 2.0 * (x as f32 + 0.5) / rect.width as f32 - 1.0;
    let ndc_y = 1.0 - 2.0 * (y as f32 + 0.5) / rect.height as f32;
    let inverse: Matrix4<f32> = viewport
        .view_projection()
        .invert()
        .expect("view projection is invertible");
    let world = inverse * Vector4::new(ndc_x, ndc_y, 0.5, 1.0);
    Point3::new(world.x / world.w, world.y / world.w, world.z / world.w)
}

pub struct TestInstance {
    pub id: u32,
    view_set: Arc<ViewSet>,
    fail_initialize: bool,
    pub points: Vec<(Point3<f32>, Rgba<u8>)>,
}

impl Instance for TestInstance {
    type Gpu = TestGpu;
    type Target = ImageFramebuffer;

    fn initialize(&mut self, gpu: &TestGpu) -> anyhow::Result<()> {
        if self.fail_initialize {
            anyhow::bail!("out of GPU memory");
        }
        gpu.initialized.lock().push(self.id);
        Ok(())
    }

    fn draw(
        &self,
        _gpu: &TestGpu,
        target: &mut ImageFramebuffer,
        viewport: &CameraViewport,
    ) -> anyhow::Result<()> {
        splat(target, viewport, &self.points);
        Ok(())
    }

    fn close(self, gpu: &TestGpu) -> anyhow::Result<()> {
        gpu.closed.lock().push(self.id);
        Ok(())
    }

    fn view_set(&self) -> &Arc<ViewSet> {
        &self.view_set
    }

    fn is_processed(&self) -> bool {
        false
    }
}

/// Lets a test hold a background load at a known point.
#[derive(Default)]
pub struct Gate {
    state: Mutex<(bool, bool)>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Called by the load: announce arrival and block until opened.
    fn arrive_and_wait(&self) {
        let mut state = self.state.lock();
        state.0 = true;
        self.changed.notify_all();
        while !state.1 {
            self.changed.wait(&mut state);
        }
    }

    pub fn wait_until_reached(&self) {
        let mut state = self.state.lock();
        while !state.0 {
            self.changed.wait(&mut state);
        }
    }

    pub fn open(&self) {
        self.state.lock().1 = true;
        self.changed.notify_all();
    }
}

/// What the next load does.
#[derive(Clone)]
pub enum Script {
    Succeed,
    FailOpen,
    PanicInBuild,
    FailInitialize,
    WaitInPreviews(Arc<Gate>),
}

/// Loader following queued scripts, one per `open`. Succeeds when none are queued.
#[derive(Default)]
pub struct ScriptedLoader {
    scripts: Mutex<VecDeque<Script>>,
    next_id: AtomicU32,
}

impl ScriptedLoader {
    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }
}

pub fn test_view_set(name: &str) -> ViewSet {
    let camera = |x: f32| CameraPose {
        name: format!("camera {}", x),
        position: [x, 0.0, 4.0],
        target: [0.0, 0.0, 0.0],
        up: [0.0, 1.0, 0.0],
        projection: 0,
        image: None,
        light: None,
    };
    ViewSet::new(name, vec![camera(-1.0), camera(1.0)])
}

impl ProjectLoader for ScriptedLoader {
    type Builder = ScriptedBuilder;

    fn open(
        &self,
        _source: &SourceDescriptor,
        _options: &LoadOptions,
        _monitor: &dyn ProgressMonitor,
    ) -> Result<ScriptedBuilder, LoadError> {
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Succeed);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Script::FailOpen = script {
            return Err(LoadError::InvalidSource(format!("project {} is broken", id)));
        }
        Ok(ScriptedBuilder {
            id,
            script,
            view_set: Arc::new(test_view_set(&format!("project {}", id))),
        })
    }
}

pub struct ScriptedBuilder {
    id: u32,
    script: Script,
    view_set: Arc<ViewSet>,
}

impl InstanceBuilder for ScriptedBuilder {
    type Instance = TestInstance;

    fn view_set(&self) -> Arc<ViewSet> {
        Arc::clone(&self.view_set)
    }

    fn generate_previews(&mut self, monitor: &dyn ProgressMonitor) -> Result<(), LoadError> {
        if let Script::WaitInPreviews(gate) = &self.script {
            gate.arrive_and_wait();
        }
        monitor.set_max_progress(3.0);
        for step in 0..3 {
            monitor.allow_user_cancellation()?;
            monitor.set_progress((step + 1) as f64, "preview");
        }
        Ok(())
    }

    fn build(self, monitor: &dyn ProgressMonitor) -> Result<TestInstance, LoadError> {
        monitor.set_stage_count(1);
        monitor.set_stage(0, "Building");
        monitor.allow_user_cancellation()?;
        if let Script::PanicInBuild = self.script {
            panic!("builder exploded");
        }
        Ok(TestInstance {
            id: self.id,
            view_set: self.view_set,
            fail_initialize: matches!(self.script, Script::FailInitialize),
            points: Vec::new(),
        })
    }
}

/// Instance manager and request queue over the test instance, with a runtime for
/// background loads.
pub struct Harness {
    pub runtime: tokio::runtime::Runtime,
    pub gpu: TestGpu,
    pub scene: Arc<SceneFlags>,
    pub loader: Arc<ScriptedLoader>,
    pub manager: Arc<InstanceManager<TestInstance>>,
    pub queue: Arc<RequestQueue<TestInstance>>,
}

impl Harness {
    pub fn new() -> Self {
        let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
        let scene = Arc::new(SceneFlags::new());
        let manager = Arc::new(InstanceManager::new(
            runtime.handle().clone(),
            scene.clone(),
        ));
        let queue = Arc::new(RequestQueue::new(Arc::clone(&manager)));
        Self {
            runtime,
            gpu: TestGpu::default(),
            scene,
            loader: Arc::new(ScriptedLoader::default()),
            manager,
            queue,
        }
    }

    pub fn start_load(&self, monitor: &Arc<RecordingMonitor>) -> relight::instance::LoadHandle {
        self.manager
            .load(
                Arc::clone(&self.loader),
                SourceDescriptor::new("project/view_set.json"),
                LoadOptions::default(),
                monitor.clone(),
            )
            .expect("load admitted")
    }

    /// Run a load to the end of its background part.
    pub fn load(&self, monitor: &Arc<RecordingMonitor>) -> LoadOutcome {
        let handle = self.start_load(monitor);
        self.runtime.block_on(handle.outcome())
    }

    /// Load and activate a project, returning its id.
    pub fn load_active(&self) -> u32 {
        let monitor = RecordingMonitor::new();
        assert_eq!(self.load(&monitor), LoadOutcome::Published);
        self.manager.update(&self.gpu);
        self.active_id().expect("instance active after update")
    }

    pub fn active_id(&self) -> Option<u32> {
        self.manager.active().map(|instance| instance.id)
    }

    /// One render tick.
    pub fn tick(&self) -> usize {
        self.manager.update(&self.gpu);
        self.queue.drain(&self.gpu)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn identity_like_view() -> Matrix4<f32> {
    Matrix4::look_at_rh(
        Point3::new(0.0, 0.0, 5.0),
        Point3::new(0.0, 0.0, 0.0),
        cgmath::Vector3::unit_y(),
    )
}
