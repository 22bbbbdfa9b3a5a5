//! Application event loop.
//!
//! The winit event-loop thread is the single thread that owns the GPU context. Every
//! redraw it
//!
//! 1. hands a freshly loaded instance over and runs queued operations ([`Session::tick`])
//! 2. clears the offscreen target and draws the active instance in tiles
//! 3. blits the target to the surface and presents it
//!
//! Loads run on the tokio runtime owned by [`App`].
//!
//! # Keys
//!
//! - `u` unload the project
//! - `r` reload the last project
//! - `e` export the project to the configured directory
//! - `c` stop the running operation
//! - `h` toggle half-resolution rendering
//! - `Escape` quit

use std::{iter, sync::Arc};

use cgmath::{Deg, Matrix4, Point3, Vector3};
use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::Window,
};

use crate::{
    config::Config,
    context::{Context, Gpu},
    export::{ExportSettings, Exporter},
    framebuffer::GpuFramebuffer,
    instance::{Instance, ProjectLoader, SourceDescriptor},
    session::{InstanceOf, Session},
    view_set::ViewSet,
    viewport::{CameraViewport, Framebuffer, PixelRect},
};

/// Events sent to the event loop from other threads.
#[derive(Debug)]
pub(crate) enum ViewerEvent {
    /// The loading thread parsed a view set; the project is not drawable yet.
    ViewSetLoaded { name: String, cameras: usize },
}

/// Camera circling the loaded project.
#[derive(Debug, Clone, Copy)]
struct Orbit {
    center: Point3<f32>,
    radius: f32,
    angle: Deg<f32>,
    speed: f32,
}

impl Orbit {
    fn new(speed: f32) -> Self {
        Self {
            center: Point3::new(0.0, 0.0, 0.0),
            radius: 5.0,
            angle: Deg(0.0),
            speed,
        }
    }

    fn advance(&mut self, seconds: f32) {
        self.angle = Deg((self.angle.0 + self.speed * seconds) % 360.0);
    }

    fn view(&self) -> Matrix4<f32> {
        let (sin, cos) = cgmath::Rad::from(self.angle).0.sin_cos();
        let eye = self.center
            + Vector3::new(cos * self.radius, 0.35 * self.radius, sin * self.radius);
        Matrix4::look_at_rh(eye, self.center, Vector3::unit_y())
    }

    fn projection(&self, aspect: f32) -> Matrix4<f32> {
        cgmath::perspective(Deg(45.0), aspect, self.radius * 0.01, self.radius * 10.0)
    }
}

struct AppState {
    ctx: Context,
    framebuffer: GpuFramebuffer,
    blitter: wgpu::util::TextureBlitter,
    is_surface_configured: bool,
    half_resolution: bool,
}

impl AppState {
    async fn new(window: Arc<Window>, config: &Config) -> anyhow::Result<Self> {
        let ctx = Context::new(window, config.clear_colour()).await?;
        let framebuffer = GpuFramebuffer::new(&ctx.gpu, ctx.config.width, ctx.config.height);
        let blitter = wgpu::util::TextureBlitter::new(&ctx.gpu.device, ctx.config.format);
        Ok(Self {
            ctx,
            framebuffer,
            blitter,
            is_surface_configured: false,
            half_resolution: config.half_resolution,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.ctx.resize(width, height) {
            self.is_surface_configured = true;
            let (width, height) = self.target_size();
            self.framebuffer.resize(width, height);
        }
    }

    fn target_size(&self) -> (u32, u32) {
        let (width, height) = (self.ctx.config.width, self.ctx.config.height);
        if self.half_resolution {
            ((width / 2).max(1), (height / 2).max(1))
        } else {
            (width, height)
        }
    }

    fn present(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.ctx
                .gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Present Encoder"),
                });
        self.blitter.copy(
            &self.ctx.gpu.device,
            &mut encoder,
            &self.framebuffer.texture().view,
            &view,
        );
        self.ctx.gpu.queue.submit(iter::once(encoder.finish()));
        self.ctx.window.pre_present_notify();
        output.present();
        Ok(())
    }
}

struct App<L: ProjectLoader, E> {
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<ViewerEvent>,
    config: Config,
    session: Session<L>,
    exporter: Arc<E>,
    initial_source: Option<SourceDescriptor>,
    state: Option<AppState>,
    orbit: Orbit,
    project_name: String,
    title: String,
    last_time: Instant,
}

impl<L, E> App<L, E>
where
    L: ProjectLoader,
    InstanceOf<L>: Instance<Gpu = Gpu, Target = GpuFramebuffer>,
    E: Exporter<InstanceOf<L>>,
{
    fn new(
        event_loop: &EventLoop<ViewerEvent>,
        loader: L,
        exporter: E,
        config: Config,
        initial_source: Option<SourceDescriptor>,
    ) -> anyhow::Result<Self> {
        let async_runtime = tokio::runtime::Runtime::new()?;
        let session = Session::new(async_runtime.handle().clone(), loader, config.load_options());
        Ok(Self {
            proxy: event_loop.create_proxy(),
            orbit: Orbit::new(config.orbit_speed),
            async_runtime,
            config,
            session,
            exporter: Arc::new(exporter),
            initial_source,
            state: None,
            project_name: String::new(),
            title: String::new(),
            last_time: Instant::now(),
        })
    }

    /// Callback announcing a load's view set as soon as it is parsed.
    fn view_set_announcer(&self) -> impl FnOnce(&Arc<ViewSet>) + Send + 'static {
        let proxy = self.proxy.clone();
        move |view_set| {
            let event = ViewerEvent::ViewSetLoaded {
                name: view_set.name.clone(),
                cameras: view_set.cameras.len(),
            };
            if let Err(e) = proxy.send_event(event) {
                log::warn!("Event loop closed before the view set arrived: {}", e);
            }
        }
    }

    fn load(&self, source: SourceDescriptor) {
        let announce = self.view_set_announcer();
        if let Err(e) = self.session.load_project_watching(source, announce) {
            log::warn!("Cannot load: {}", e);
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        match key {
            Key::Named(NamedKey::Escape) => self.exit(event_loop),
            Key::Character(c) => match c.as_str() {
                "u" => self.session.unload(),
                "r" => {
                    match self.session.reload_watching(self.view_set_announcer()) {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => log::warn!("Cannot reload: {}", e),
                        None => log::info!("Nothing to reload"),
                    }
                }
                "e" => {
                    let exported = self.session.export(
                        Arc::clone(&self.exporter),
                        self.config.export_directory.clone(),
                        ExportSettings {
                            overwrite: true,
                            ..Default::default()
                        },
                    );
                    if let Err(e) = exported {
                        log::warn!("Cannot export: {}", e);
                    }
                }
                "c" => {
                    if !self.session.cancel() {
                        log::info!("Nothing to stop");
                    }
                }
                "h" => {
                    if let Some(state) = &mut self.state {
                        state.half_resolution = !state.half_resolution;
                        let (width, height) = state.target_size();
                        state.framebuffer.resize(width, height);
                        log::info!("Rendering at {}x{}", width, height);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            self.session.shutdown(&state.ctx.gpu);
        }
        event_loop.exit();
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let Some(state) = &mut self.state else {
            return Ok(());
        };
        if !state.is_surface_configured {
            return Ok(());
        }

        let dt = self.last_time.elapsed();
        self.last_time = Instant::now();

        self.session.tick(&state.ctx.gpu);

        if let Some(instance) = self.session.manager().active() {
            let view_set = instance.view_set();
            self.orbit.center = view_set.centroid();
            self.orbit.radius = (view_set.bounding_radius() * 2.5).max(1.0);
        }
        self.orbit.advance(dt.as_secs_f32());

        let (width, height) = state.framebuffer.size();
        let viewport = CameraViewport::new(
            self.orbit.view(),
            self.orbit.projection(width as f32 / height as f32),
            PixelRect::sized(width, height),
        );
        state.framebuffer.clear(state.ctx.clear_colour);
        if let Err(e) =
            self.session
                .draw(&state.ctx.gpu, &mut state.framebuffer, &viewport, self.config.tile)
        {
            log::error!("Unable to draw the project: {:#}", e);
        }
        if let Err(e) = state.framebuffer.flush() {
            log::error!("Unable to submit the frame: {:#}", e);
        }
        state.present()?;

        self.update_title();
        Ok(())
    }

    fn update_title(&mut self) {
        let Some(state) = &self.state else {
            return;
        };
        let status = self.session.status().summary();
        let title = match (status.is_empty(), self.project_name.is_empty()) {
            (true, true) => "relight".to_string(),
            (true, false) => format!("relight - {}", self.project_name),
            (false, true) => format!("relight - {}", status),
            (false, false) => format!("relight - {} - {}", self.project_name, status),
        };
        if title != self.title {
            state.ctx.window.set_title(&title);
            self.title = title;
        }
    }
}

impl<L, E> ApplicationHandler<ViewerEvent> for App<L, E>
where
    L: ProjectLoader,
    InstanceOf<L>: Instance<Gpu = Gpu, Target = GpuFramebuffer>,
    E: Exporter<InstanceOf<L>>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let window_attributes = Window::default_attributes().with_title("relight");
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Cannot create the window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self
            .async_runtime
            .block_on(AppState::new(window, &self.config))
        {
            Ok(mut state) => {
                let size = state.ctx.window.inner_size();
                state.resize(size.width, size.height);
                state.ctx.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => {
                log::error!("App initialization failed: {:#}", e);
                event_loop.exit();
                return;
            }
        }

        if let Some(source) = self.initial_source.take() {
            self.load(source);
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::ViewSetLoaded { name, cameras } => {
                log::info!("View set {:?} with {} cameras is loading", name, cameras);
                self.project_name = name;
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        if self.state.is_none() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.exit(event_loop),
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, &logical_key),
            WindowEvent::RedrawRequested => {
                match self.render() {
                    Ok(()) => {}
                    // Reconfigure the surface if it's lost or outdated
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        if let Some(state) = &mut self.state {
                            let size = state.ctx.window.inner_size();
                            state.resize(size.width, size.height);
                        }
                    }
                    Err(e) => log::error!("Unable to render {}", e),
                }
                if let Some(state) = &self.state {
                    state.ctx.window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Open a window and run the viewer until it is closed.
///
/// `source` is loaded as soon as the window exists.
pub fn run<L, E>(
    loader: L,
    exporter: E,
    config: Config,
    source: Option<SourceDescriptor>,
) -> anyhow::Result<()>
where
    L: ProjectLoader,
    InstanceOf<L>: Instance<Gpu = Gpu, Target = GpuFramebuffer>,
    E: Exporter<InstanceOf<L>>,
{
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    };

    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, loader, exporter, config, source)?;
    event_loop.run_app(&mut app)?;
    Ok(())
}
