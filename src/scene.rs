use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Scene/UI state updated by the instance manager whenever the active project changes.
pub trait SceneState: Send + Sync {
    fn set_project_loaded(&self, loaded: bool);

    /// Bounding radius of the loaded model in world units.
    fn set_model_size(&self, size: f32);

    /// Whether materials of the loaded model have been fitted.
    fn set_processed(&self, processed: bool);
}

/// Lock-free [`SceneState`] the render loop can read every frame.
#[derive(Debug, Default)]
pub struct SceneFlags {
    project_loaded: AtomicBool,
    processed: AtomicBool,
    model_size: AtomicU32,
}

impl SceneFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_project_loaded(&self) -> bool {
        self.project_loaded.load(Ordering::Acquire)
    }

    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::Acquire)
    }

    pub fn model_size(&self) -> f32 {
        f32::from_bits(self.model_size.load(Ordering::Acquire))
    }
}

impl SceneState for SceneFlags {
    fn set_project_loaded(&self, loaded: bool) {
        self.project_loaded.store(loaded, Ordering::Release);
    }

    fn set_model_size(&self, size: f32) {
        self.model_size.store(size.to_bits(), Ordering::Release);
    }

    fn set_processed(&self, processed: bool) {
        self.processed.store(processed, Ordering::Release);
    }
}
