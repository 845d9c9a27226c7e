//! Partitioning a raster into overlapping tiles.

use serde::Serialize;

use super::params::TileParams;
use crate::config::EngineLimits;
use crate::error::{Result, UpscaleError};

/// An input-space rectangle processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRect {
    /// Position in row-major order.
    pub index: usize,
    pub column: u32,
    pub row: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    /// Whether both sides reach `min_tile`.
    pub fn is_viable(&self, min_tile: u32) -> bool {
        self.width >= min_tile && self.height >= min_tile
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// The full tile grid for one raster.
#[derive(Debug, Clone, Serialize)]
pub struct TilePlan {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
    pub stride: u32,
    pub columns: u32,
    pub rows: u32,
    /// True when the raster fits a single tile and goes to the model whole.
    pub direct: bool,
    pub tiles: Vec<TileRect>,
}

impl TilePlan {
    /// Plan tiles for a `width`×`height` raster.
    ///
    /// Origins advance by `tile_size - overlap` from 0 while they stay inside
    /// the raster; tiles on the last row and column are clipped to the bounds.
    pub fn new(width: u32, height: u32, scale: u32, params: &TileParams) -> Result<Self> {
        params.validate()?;
        if width == 0 || height == 0 {
            return Err(UpscaleError::validation(
                "image",
                format!("cannot tile an empty {}x{} raster", width, height),
            ));
        }
        if scale == 0 || scale > EngineLimits::MAX_SCALE {
            return Err(UpscaleError::validation(
                "scale",
                format!("{} outside 1..={}", scale, EngineLimits::MAX_SCALE),
            ));
        }
        if width.checked_mul(scale).is_none() || height.checked_mul(scale).is_none() {
            return Err(UpscaleError::validation(
                "image",
                format!("{}x{} at {}x overflows output coordinates", width, height, scale),
            ));
        }

        let stride = params.stride();
        if width <= params.tile_size && height <= params.tile_size {
            return Ok(Self {
                width,
                height,
                scale,
                stride,
                columns: 1,
                rows: 1,
                direct: true,
                tiles: vec![TileRect {
                    index: 0,
                    column: 0,
                    row: 0,
                    x: 0,
                    y: 0,
                    width,
                    height,
                }],
            });
        }

        let xs = axis_origins(width, stride);
        let ys = axis_origins(height, stride);
        let mut tiles = Vec::with_capacity(xs.len() * ys.len());
        for (row, &y) in ys.iter().enumerate() {
            for (column, &x) in xs.iter().enumerate() {
                tiles.push(TileRect {
                    index: tiles.len(),
                    column: column as u32,
                    row: row as u32,
                    x,
                    y,
                    width: params.tile_size.min(width - x),
                    height: params.tile_size.min(height - y),
                });
            }
        }

        Ok(Self {
            width,
            height,
            scale,
            stride,
            columns: xs.len() as u32,
            rows: ys.len() as u32,
            direct: false,
            tiles,
        })
    }

    /// Output size; [`TilePlan::new`] rejects plans where this overflows.
    pub fn output_dimensions(&self) -> (u32, u32) {
        (self.width * self.scale, self.height * self.scale)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles that will be filled by classical resize instead of the model.
    pub fn undersized(&self, min_tile: u32) -> impl Iterator<Item = &TileRect> {
        self.tiles.iter().filter(move |t| !t.is_viable(min_tile))
    }
}

fn axis_origins(extent: u32, stride: u32) -> Vec<u32> {
    (0..extent).step_by(stride as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_image_is_direct() {
        let plan = TilePlan::new(300, 200, 4, &TileParams::new(512, 64)).unwrap();
        assert!(plan.direct);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.tiles[0].shape(), (300, 200));
        assert_eq!(plan.output_dimensions(), (1200, 800));
    }

    #[test]
    fn test_exact_tile_is_direct() {
        let plan = TilePlan::new(512, 512, 2, &TileParams::new(512, 64)).unwrap();
        assert!(plan.direct);
    }

    #[test]
    fn test_reference_grid() {
        // 2000x1500, T=512, O=64: stride 448, grid ceil(2000/448) x ceil(1500/448)
        let plan = TilePlan::new(2000, 1500, 4, &TileParams::new(512, 64)).unwrap();
        assert!(!plan.direct);
        assert_eq!(plan.stride, 448);
        assert_eq!(plan.columns, 5);
        assert_eq!(plan.rows, 4);
        assert_eq!(plan.len(), 20);
        assert_eq!(plan.output_dimensions(), (8000, 6000));
        for tile in &plan.tiles {
            assert!(tile.width <= 512 && tile.height <= 512);
            assert!(tile.right() <= 2000 && tile.bottom() <= 1500);
        }
    }

    #[test]
    fn test_row_major_order() {
        let plan = TilePlan::new(1000, 1000, 2, &TileParams::new(512, 64)).unwrap();
        for (i, tile) in plan.tiles.iter().enumerate() {
            assert_eq!(tile.index, i);
            assert_eq!(tile.row * plan.columns + tile.column, i as u32);
        }
    }

    #[test]
    fn test_tiles_cover_every_pixel() {
        let (w, h) = (1037, 611);
        let plan = TilePlan::new(w, h, 2, &TileParams::new(256, 48)).unwrap();
        let mut covered = vec![false; (w * h) as usize];
        for t in &plan.tiles {
            for y in t.y..t.bottom() {
                for x in t.x..t.right() {
                    covered[(y * w + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_undersized_edge_tiles() {
        // stride 448: origins 0 and 448 and 896; last column is 4px wide
        let plan = TilePlan::new(900, 600, 4, &TileParams::new(512, 64)).unwrap();
        assert_eq!(plan.columns, 3);
        let undersized: Vec<_> = plan.undersized(32).collect();
        assert!(!undersized.is_empty());
        assert!(undersized.iter().all(|t| t.x == 896 && t.width == 4));
    }

    #[test]
    fn test_rejects_empty_raster() {
        assert!(TilePlan::new(0, 10, 4, &TileParams::default()).is_err());
    }

    #[test]
    fn test_rejects_scale_out_of_range() {
        let params = TileParams::new(64, 8);
        assert!(TilePlan::new(100, 80, 0, &params).is_err());
        assert!(TilePlan::new(100, 80, 9, &params).is_err());
        let err = TilePlan::new(100, 80, 100_000_000, &params).unwrap_err();
        assert!(matches!(err, UpscaleError::Validation { .. }));
        assert!(TilePlan::new(100, 80, 8, &params).is_ok());
    }

    #[test]
    fn test_rejects_output_coordinate_overflow() {
        assert!(TilePlan::new(u32::MAX / 2, 10, 4, &TileParams::default()).is_err());
    }

    #[test]
    fn test_rejects_invalid_params() {
        assert!(TilePlan::new(100, 100, 4, &TileParams::new(32, 40)).is_err());
    }
}
