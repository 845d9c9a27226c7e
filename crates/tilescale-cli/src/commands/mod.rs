//! Subcommand implementations and the flags they share.

pub mod batch;
pub mod info;
pub mod models;
pub mod plan;
pub mod upscale;

pub use batch::BatchArgs;
pub use info::InfoArgs;
pub use models::ModelsArgs;
pub use plan::PlanArgs;
pub use upscale::UpscaleArgs;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tilescale_core::model::resolve_model;
use tilescale_core::{
    optimal_params, AppConfig, DeviceProfile, EngineLimits, LanczosUpscaler, OnnxOptions, OnnxUpscaler,
    PathsConfig, TileDefaults, TileParams, UpscaleModel, ValueRange,
};
use tracing::info;

/// Model name accepted in place of an ONNX file.
pub const LANCZOS_MODEL: &str = "lanczos";

/// Scale used by the classical model and the planner when none is given.
const FALLBACK_SCALE: u32 = 4;

/// Which model to run and how to feed it.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model name, registry entry, path to an .onnx file, or "lanczos"
    #[arg(short, long, default_value = AppConfig::DEFAULT_MODEL)]
    pub model: String,

    /// Upscale factor (inferred from the model name when omitted)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=EngineLimits::MAX_SCALE as i64))]
    pub scale: Option<u32>,

    /// Pixel range the model expects: unit (0-1) or byte (0-255)
    #[arg(long)]
    pub value_range: Option<ValueRange>,

    /// ONNX Runtime intra-op threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Models directory (defaults to $TILESCALE_MODELS_DIR or the config dir)
    #[arg(long)]
    pub models_dir: Option<PathBuf>,
}

impl ModelArgs {
    pub fn models_dir(&self) -> PathBuf {
        self.models_dir.clone().unwrap_or_else(PathsConfig::models_dir)
    }

    /// Resolve and load the requested model.
    pub fn load(&self) -> Result<Box<dyn UpscaleModel>> {
        if self.model.eq_ignore_ascii_case(LANCZOS_MODEL) {
            let scale = self.scale.unwrap_or(FALLBACK_SCALE);
            return Ok(Box::new(LanczosUpscaler::new(scale)?));
        }

        let resolved = resolve_model(&self.model, &self.models_dir())?;
        info!("Using model {} ({})", resolved.name, resolved.path.display());
        let options = OnnxOptions {
            scale: self.scale.or(resolved.scale),
            value_range: self.value_range.unwrap_or(resolved.value_range),
            intra_threads: self.threads,
        };
        let model = OnnxUpscaler::load(&resolved.path, &options)
            .with_context(|| format!("Failed to load model {}", resolved.path.display()))?;
        Ok(Box::new(model))
    }
}

/// Tile geometry flags.
#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// Tile side length in input pixels
    #[arg(short, long, default_value_t = TileDefaults::TILE_SIZE)]
    pub tile: u32,

    /// Overlap between neighbouring tiles in input pixels
    #[arg(short, long, default_value_t = TileDefaults::OVERLAP)]
    pub overlap: u32,

    /// Edge tiles smaller than this are resized instead of inferred
    #[arg(long, default_value_t = TileDefaults::MIN_TILE)]
    pub min_tile: u32,

    /// Same-shaped tiles per model call
    #[arg(short, long, default_value_t = TileDefaults::BATCH_SIZE)]
    pub batch_size: usize,

    /// Derive tile and batch size from image size and device memory
    #[arg(long)]
    pub auto_tile: bool,

    /// Reflection-pad edge tiles to the full tile size
    #[arg(long)]
    pub pad_to_tile: bool,
}

impl TileArgs {
    /// Parameters for a `width`×`height` image at `scale`.
    pub fn params_for(
        &self,
        width: u32,
        height: u32,
        scale: u32,
        device: Option<&DeviceProfile>,
    ) -> TileParams {
        let base = match (self.auto_tile, device) {
            (true, Some(device)) => optimal_params(width, height, device, scale),
            _ => TileParams::new(self.tile, self.overlap).with_batch_size(self.batch_size),
        };
        base.with_min_tile(self.min_tile.min(base.tile_size))
            .with_pad_to_tile(self.pad_to_tile)
    }

    /// The device profile, probed only when auto-tiling.
    pub fn device(&self) -> Option<DeviceProfile> {
        self.auto_tile.then(|| {
            let device = DeviceProfile::detect();
            info!(
                "Detected {} device with {:.1} GiB",
                device.kind,
                device.memory_gib()
            );
            device
        })
    }
}
