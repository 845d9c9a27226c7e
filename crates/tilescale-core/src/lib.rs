//! Tilescale Core - tiled super-resolution inference.
//!
//! Runs a fixed-scale super-resolution model over rasters of any size by
//! cutting them into overlapping tiles, inferring each tile (batched when
//! shapes match), and stitching the results with linear seam blending. Tiles
//! the model cannot handle fall back to a Lanczos3 resize instead of failing
//! the run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tilescale_core::model::{resolve_model, OnnxOptions, OnnxUpscaler};
//! use tilescale_core::{raster, PathsConfig, TileParams, TiledUpscaler};
//!
//! fn main() -> tilescale_core::Result<()> {
//!     let resolved = resolve_model("RealESRGAN_x4plus", &PathsConfig::models_dir())?;
//!     let model = OnnxUpscaler::load(&resolved.path, &OnnxOptions::default())?;
//!     let mut engine = TiledUpscaler::new(model, TileParams::default())?;
//!
//!     let input = raster::load_rgb(Path::new("photo.jpg"))?;
//!     let outcome = engine.upscale(&input)?;
//!     raster::save_rgb(&outcome.image, Path::new("photo_upscaled.jpg"))?;
//!
//!     println!("{} tiles, {} fell back", outcome.report.tiles_total, outcome.report.tiles_fallback);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod frames;
pub mod model;
pub mod raster;
pub mod system;
pub mod tiling;
pub mod timing;

mod persist;

// Re-export commonly used types
pub use cache::{CacheInfo, CacheStats, CachedUpscale, FileSignature, ResultCache};
pub use cancel::CancellationToken;
pub use config::{AppConfig, EngineLimits, PathsConfig, TileDefaults};
pub use error::{Result, UpscaleError};
pub use frames::{upscale_frames, FrameReport};
pub use model::{InputShape, LanczosUpscaler, OnnxOptions, OnnxUpscaler, UpscaleModel, ValueRange};
pub use system::{DeviceKind, DeviceProfile};
pub use tiling::{
    optimal_params, TileParams, TilePlan, TileRect, TiledUpscaler, UpscaleOutcome, UpscaleReport,
};
pub use timing::{PerformanceTracker, TileTimings};
