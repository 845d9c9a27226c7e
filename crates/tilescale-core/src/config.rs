//! Centralized configuration for tilescale.
//!
//! Constants for tiling defaults, engine limits, and on-disk locations, plus
//! the environment lookups that resolve the models and cache directories.

use std::path::PathBuf;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "tilescale";
    pub const DEFAULT_MODEL: &'static str = "RealESRGAN_x4plus";
    pub const UPSCALED_SUFFIX: &'static str = "_upscaled";
}

/// Default tiling parameters.
pub struct TileDefaults;

impl TileDefaults {
    pub const TILE_SIZE: u32 = 512;
    pub const OVERLAP: u32 = 64;
    /// Clipped edge tiles below this side length skip the model.
    pub const MIN_TILE: u32 = 32;
    pub const BATCH_SIZE: usize = 1;
    /// Weight of the newer tile at the outer edge of an overlap band.
    pub const BLEND_FLOOR: f32 = 0.3;
    /// Fraction of tiles between progress log lines.
    pub const PROGRESS_STEPS: usize = 10;
}

/// Hard limits the engine checks before allocating.
pub struct EngineLimits;

impl EngineLimits {
    /// Largest output raster the engine will allocate (8 GiB of RGB8).
    pub const MAX_OUTPUT_BYTES: u64 = 8 * 1024 * 1024 * 1024;
    pub const MAX_SCALE: u32 = 8;
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const MODELS_DIR_ENV: &'static str = "TILESCALE_MODELS_DIR";
    pub const CACHE_DIR_ENV: &'static str = "TILESCALE_CACHE";
    pub const MODELS_DIR_NAME: &'static str = "models";
    pub const ONNX_SUBDIR_NAME: &'static str = "onnx";
    pub const REGISTRY_FILENAME: &'static str = "config.json";
    pub const RESULT_CACHE_NAME: &'static str = "upscale";
    pub const CACHE_FILENAME: &'static str = "cache.json";
    pub const MODEL_EXTENSION: &'static str = "onnx";
    pub const IMAGE_EXTENSIONS: &'static [&'static str] =
        &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];
}

impl PathsConfig {
    /// Directory holding model files and `config.json`.
    ///
    /// `$TILESCALE_MODELS_DIR`, else `<config dir>/tilescale/models`.
    pub fn models_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(Self::MODELS_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(AppConfig::APP_NAME)
            .join(Self::MODELS_DIR_NAME)
    }

    /// Root directory for tilescale caches.
    ///
    /// `$TILESCALE_CACHE`, else `<cache dir>/tilescale`.
    pub fn cache_root() -> PathBuf {
        if let Some(dir) = std::env::var_os(Self::CACHE_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(AppConfig::APP_NAME)
    }

    /// Whether a path has one of the supported raster extensions.
    pub fn is_image_path(path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_ascii_lowercase();
                Self::IMAGE_EXTENSIONS.contains(&lower.as_str())
            })
            .unwrap_or(false)
    }
}
