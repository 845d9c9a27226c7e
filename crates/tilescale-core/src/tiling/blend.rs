//! Output canvas with seam blending.
//!
//! The canvas tracks which output pixels already hold data. A newly placed
//! tile is written directly where nothing was placed yet and alpha-blended
//! over earlier tiles inside its overlap bands.

use image::{Rgb, RgbImage};

/// Widths of the overlap bands along a tile's leading edges, in output pixels.
///
/// A zero band means the tile has no earlier neighbour on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bands {
    pub left: u32,
    pub top: u32,
}

/// Weight of the newer tile at local position `(x, y)` inside its bands.
///
/// Rises linearly from `floor` at the outer edge of a band to 1.0 at its
/// inner edge. Where a top and a left band meet, the smaller weight wins.
pub fn alpha(x: u32, y: u32, bands: Bands, floor: f32) -> f32 {
    ramp(x, bands.left, floor).min(ramp(y, bands.top, floor))
}

fn ramp(pos: u32, band: u32, floor: f32) -> f32 {
    if pos >= band {
        return 1.0;
    }
    if band == 1 {
        return floor;
    }
    floor + (1.0 - floor) * pos as f32 / (band - 1) as f32
}

fn mix(new: u8, old: u8, alpha: f32) -> u8 {
    (alpha * new as f32 + (1.0 - alpha) * old as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// The full-resolution output raster under assembly.
pub struct Canvas {
    image: RgbImage,
    covered: Vec<bool>,
    blend_floor: f32,
}

impl Canvas {
    pub fn new(width: u32, height: u32, blend_floor: f32) -> Self {
        Self {
            image: RgbImage::new(width, height),
            covered: vec![false; width as usize * height as usize],
            blend_floor,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Place an upscaled tile with its origin at `(ox, oy)`.
    ///
    /// Parts of the tile outside the canvas are dropped.
    pub fn place(&mut self, ox: u32, oy: u32, tile: &RgbImage, bands: Bands) {
        let (width, height) = self.clipped_extent(ox, oy, tile);
        let stride = self.image.width() as usize;

        for ly in 0..height {
            for lx in 0..width {
                let (cx, cy) = (ox + lx, oy + ly);
                let slot = cy as usize * stride + cx as usize;
                let new = *tile.get_pixel(lx, ly);
                if self.covered[slot] {
                    let a = alpha(lx, ly, bands, self.blend_floor);
                    let old = *self.image.get_pixel(cx, cy);
                    self.image.put_pixel(
                        cx,
                        cy,
                        Rgb([
                            mix(new[0], old[0], a),
                            mix(new[1], old[1], a),
                            mix(new[2], old[2], a),
                        ]),
                    );
                } else {
                    self.image.put_pixel(cx, cy, new);
                    self.covered[slot] = true;
                }
            }
        }
    }

    /// Write a tile only where the canvas holds no data yet.
    ///
    /// Used for undersized edge tiles, which must never overwrite model output.
    pub fn fill_uncovered(&mut self, ox: u32, oy: u32, tile: &RgbImage) -> usize {
        let (width, height) = self.clipped_extent(ox, oy, tile);
        let stride = self.image.width() as usize;
        let mut filled = 0;

        for ly in 0..height {
            for lx in 0..width {
                let (cx, cy) = (ox + lx, oy + ly);
                let slot = cy as usize * stride + cx as usize;
                if !self.covered[slot] {
                    self.image.put_pixel(cx, cy, *tile.get_pixel(lx, ly));
                    self.covered[slot] = true;
                    filled += 1;
                }
            }
        }
        filled
    }

    pub fn uncovered_count(&self) -> usize {
        self.covered.iter().filter(|c| !**c).count()
    }

    pub fn is_complete(&self) -> bool {
        self.covered.iter().all(|c| *c)
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    fn clipped_extent(&self, ox: u32, oy: u32, tile: &RgbImage) -> (u32, u32) {
        let (cw, ch) = self.image.dimensions();
        let width = tile.width().min(cw.saturating_sub(ox));
        let height = tile.height().min(ch.saturating_sub(oy));
        (width, height)
    }
}
