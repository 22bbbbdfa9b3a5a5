//! relight
//!
//! Project loading and render-request orchestration for an interactive viewer of
//! relightable photogrammetry projects. A project is loaded in the background while
//! the previous one keeps rendering, operations on the loaded project are queued until
//! one exists, long operations report staged progress and can be stopped, and frames
//! are drawn in tiles so that no single GPU submission runs into a driver timeout.
//!
//! High-level modules
//! - `progress`: progress monitors, their composition and the UI/log sinks
//! - `viewport`: camera viewports and tiled drawing
//! - `instance`: the active project's lifecycle and the loader interfaces
//! - `request`: operations deferred until a project is loaded
//! - `session`: application context bundling the above
//! - `export`: exporting the loaded project
//! - `preview`: thumbnail preview loader and instance
//! - `context`, `framebuffer`, `texture`: wgpu device, offscreen target and textures
//! - `config`: TOML configuration
//! - `flow`: the winit event loop
//!

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod flow;
pub mod framebuffer;
pub mod instance;
pub mod preview;
pub mod progress;
pub mod request;
pub mod scene;
pub mod session;
pub mod texture;
pub mod view_set;
pub mod viewport;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::{Deg, Matrix4, Point3, Vector3};
pub use config::Config;
pub use instance::{Instance, InstanceManager, LoadError, LoadOptions, SourceDescriptor};
pub use progress::{Cancelled, Conflict, ProgressMonitor};
pub use session::Session;
pub use viewport::{CameraViewport, Framebuffer, PixelRect, TileSize, draw_in_subdivisions};
