//! Tiled inference.
//!
//! Large rasters are cut into overlapping tiles so each model call fits in
//! accelerator memory. Results are stitched back with linear seam blending.

pub mod auto;
mod blend;
mod engine;
mod params;
mod plan;
mod tensor;

pub use auto::optimal_params;
pub use blend::{alpha, Bands, Canvas};
pub use engine::{TiledUpscaler, UpscaleOutcome, UpscaleReport};
pub use params::TileParams;
pub use plan::{TilePlan, TileRect};
pub use tensor::{pad_reflect, TensorBatch};
