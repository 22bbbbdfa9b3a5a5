#[cfg(feature = "integration-tests")]
use std::fs;
#[cfg(feature = "integration-tests")]
use std::sync::Arc;

#[cfg(feature = "integration-tests")]
use image::{Rgba, RgbaImage};
#[cfg(feature = "integration-tests")]
use relight::{
    Deg, Instance, Matrix4, Point3, Vector3,
    context::Gpu,
    framebuffer::GpuFramebuffer,
    instance::{InstanceManager, LoadOptions, LoadOutcome, SourceDescriptor},
    preview::{PreviewInstance, PreviewLoader},
    scene::SceneFlags,
    viewport::{CameraViewport, PixelRect, TileSize},
};

#[cfg(feature = "integration-tests")]
use crate::common::test_utils::RecordingMonitor;

mod common;

#[cfg(feature = "integration-tests")]
const VIEW_SET: &str = r#"{
    "name": "gpu",
    "lights": [{ "position": [0.0, 2.0, 0.0] }],
    "cameras": [
        { "name": "a", "position": [-1.0, 0.0, 2.0], "target": [0.0, 0.0, 0.0], "image": "a.png", "light": 0 },
        { "name": "b", "position": [1.0, 0.0, 2.0], "target": [0.0, 0.0, 0.0] }
    ]
}"#;

#[cfg(feature = "integration-tests")]
#[test]
fn preview_draws_in_tiles_on_a_headless_device() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let gpu = runtime.block_on(Gpu::headless()).expect("headless GPU");

    let project = tempfile::tempdir().expect("temp dir");
    fs::write(project.path().join("view_set.json"), VIEW_SET).expect("write view set");
    RgbaImage::from_pixel(32, 32, Rgba([10, 200, 90, 255]))
        .save(project.path().join("a.png"))
        .expect("write photograph");

    let manager: Arc<InstanceManager<PreviewInstance>> = Arc::new(InstanceManager::new(
        runtime.handle().clone(),
        Arc::new(SceneFlags::new()),
    ));
    let monitor = RecordingMonitor::new();
    let handle = manager
        .load(
            Arc::new(PreviewLoader::default()),
            SourceDescriptor::new(project.path().join("view_set.json")),
            LoadOptions::default(),
            monitor.clone(),
        )
        .expect("load admitted");
    assert_eq!(runtime.block_on(handle.outcome()), LoadOutcome::Published);
    manager.update(&gpu);
    assert!(monitor.follows_protocol(), "{:?}", monitor.events());
    let instance = manager.active().expect("preview active");
    assert!(instance.is_initialized());
    assert_eq!(instance.view_set().cameras.len(), 2);

    let viewport = CameraViewport::new(
        Matrix4::look_at_rh(
            Point3::new(0.0, 0.0, 6.0),
            Point3::new(0.0, 0.0, 0.0),
            Vector3::unit_y(),
        ),
        cgmath::perspective(Deg(45.0), 300.0 / 200.0, 0.1, 100.0),
        PixelRect::sized(300, 200),
    );
    let mut framebuffer = GpuFramebuffer::new(&gpu, 300, 200);
    framebuffer.clear(wgpu::Color::BLACK);
    let drawn = manager
        .draw(&gpu, &mut framebuffer, &viewport, TileSize::new(128, 128))
        .expect("draw");

    // Tiles without sprites record nothing and are not submitted.
    assert!(drawn);
    let submissions = framebuffer.submissions();
    assert!((1..=6).contains(&submissions), "{}", submissions);
    drop(instance);
    manager.shutdown(&gpu);
    assert!(!manager.is_loaded());
}
