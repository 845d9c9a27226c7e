//! Tile geometry and batching parameters.

use serde::{Deserialize, Serialize};

use crate::config::TileDefaults;
use crate::error::{Result, UpscaleError};

/// Parameters controlling how a raster is cut into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileParams {
    /// Side length of a full tile in input pixels.
    pub tile_size: u32,
    /// Pixels shared by adjacent tiles. Stride is `tile_size - overlap`.
    pub overlap: u32,
    /// Clipped tiles narrower or shorter than this never reach the model.
    pub min_tile: u32,
    /// Maximum number of same-shaped tiles per model call.
    pub batch_size: usize,
    /// Alpha of the newer tile at the outer edge of an overlap band.
    pub blend_floor: f32,
    /// Reflection-pad clipped tiles up to `tile_size` before inference.
    pub pad_to_tile: bool,
}

impl Default for TileParams {
    fn default() -> Self {
        Self {
            tile_size: TileDefaults::TILE_SIZE,
            overlap: TileDefaults::OVERLAP,
            min_tile: TileDefaults::MIN_TILE,
            batch_size: TileDefaults::BATCH_SIZE,
            blend_floor: TileDefaults::BLEND_FLOOR,
            pad_to_tile: false,
        }
    }
}

impl TileParams {
    /// Build parameters from a tile size and overlap, defaults elsewhere.
    pub fn new(tile_size: u32, overlap: u32) -> Self {
        Self {
            tile_size,
            overlap,
            ..Self::default()
        }
    }

    pub fn with_min_tile(mut self, min_tile: u32) -> Self {
        self.min_tile = min_tile;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_pad_to_tile(mut self, pad: bool) -> Self {
        self.pad_to_tile = pad;
        self
    }

    /// Distance between the origins of neighbouring tiles.
    pub fn stride(&self) -> u32 {
        self.tile_size - self.overlap
    }

    /// Check the invariants the tiling plan relies on.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(UpscaleError::validation("tile_size", "must be positive"));
        }
        if self.overlap >= self.tile_size {
            return Err(UpscaleError::validation(
                "overlap",
                format!(
                    "overlap ({}) must be smaller than tile_size ({})",
                    self.overlap, self.tile_size
                ),
            ));
        }
        if self.min_tile == 0 || self.min_tile > self.tile_size {
            return Err(UpscaleError::validation(
                "min_tile",
                format!("must be within 1..={}", self.tile_size),
            ));
        }
        if self.batch_size == 0 {
            return Err(UpscaleError::validation("batch_size", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.blend_floor) {
            return Err(UpscaleError::validation(
                "blend_floor",
                "must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}
