//! Viewer configuration, read from TOML.
//!
//! ```toml
//! half_resolution = false
//! clear_colour = [0.05, 0.05, 0.08, 1.0]
//! thumbnail_size = 96
//!
//! [tile]
//! width = 256
//! height = 256
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::instance::LoadOptions;
use crate::viewport::TileSize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound for one GPU submission of a subdivided draw.
    pub tile: TileSize,
    /// Render offscreen at half the window size.
    pub half_resolution: bool,
    pub clear_colour: [f64; 4],
    pub thumbnail_size: u32,
    pub generate_previews: bool,
    pub marker_size: u32,
    /// Degrees per second of the automatic camera orbit.
    pub orbit_speed: f32,
    pub export_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tile: TileSize::default(),
            half_resolution: false,
            clear_colour: [0.05, 0.05, 0.08, 1.0],
            thumbnail_size: 96,
            generate_previews: true,
            marker_size: 6,
            orbit_speed: 10.0,
            export_directory: PathBuf::from("export"),
        }
    }
}

impl Config {
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let toml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&toml)
    }

    /// Read `path` if it exists, fall back to defaults otherwise.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::info!("No config at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile.width == 0 || self.tile.height == 0 {
            return Err(ConfigError::Invalid("tile size must be positive".into()));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::Invalid("thumbnail_size must be positive".into()));
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            generate_previews: self.generate_previews,
            thumbnail_size: self.thumbnail_size,
            ..Default::default()
        }
    }

    pub fn clear_colour(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_colour;
        wgpu::Color { r, g, b, a }
    }
}
