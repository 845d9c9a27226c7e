//! Conversions between RGB8 rasters and NCHW float tensors.
//!
//! Tensors handed to a model hold values in `[0, 1]`; backends that expect
//! another range rescale on their side.

use image::{Rgb, RgbImage};

use crate::error::{Result, UpscaleError};

const CHANNELS: usize = 3;

/// A batch of images in NCHW layout, `f32` in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    pub data: Vec<f32>,
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorBatch {
    pub fn zeros(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            data: vec![0.0; batch * channels * height * width],
            batch,
            channels,
            height,
            width,
        }
    }

    /// Wrap raw NCHW data, checking its length against the shape.
    pub fn from_raw(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let [batch, channels, height, width] = shape;
        let expected = batch * channels * height * width;
        if data.len() != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            batch,
            channels,
            height,
            width,
        })
    }

    /// Normalize and stack same-shaped rasters: u8 / 255, HWC to CHW.
    pub fn from_images(images: &[&RgbImage]) -> Result<Self> {
        let first = images
            .first()
            .ok_or_else(|| UpscaleError::validation("batch", "cannot build an empty batch"))?;
        let (width, height) = first.dimensions();
        let (w, h) = (width as usize, height as usize);
        let plane = w * h;
        let mut tensor = Self::zeros(images.len(), CHANNELS, h, w);

        for (n, image) in images.iter().enumerate() {
            if image.dimensions() != (width, height) {
                return Err(UpscaleError::ShapeMismatch {
                    expected: vec![h, w],
                    actual: vec![image.height() as usize, image.width() as usize],
                });
            }
            let base = n * CHANNELS * plane;
            for (i, pixel) in image.pixels().enumerate() {
                tensor.data[base + i] = pixel[0] as f32 / 255.0;
                tensor.data[base + plane + i] = pixel[1] as f32 / 255.0;
                tensor.data[base + 2 * plane + i] = pixel[2] as f32 / 255.0;
            }
        }
        Ok(tensor)
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    /// Number of values in one image of the batch.
    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Denormalize image `n` back to RGB8: ×255, clamp, round, CHW to HWC.
    pub fn to_image(&self, n: usize) -> Result<RgbImage> {
        if self.channels != CHANNELS {
            return Err(UpscaleError::ShapeMismatch {
                expected: vec![self.batch, CHANNELS, self.height, self.width],
                actual: self.shape().to_vec(),
            });
        }
        if n >= self.batch {
            return Err(UpscaleError::validation(
                "batch",
                format!("image {} out of range for batch of {}", n, self.batch),
            ));
        }
        let plane = self.height * self.width;
        let base = n * self.image_len();
        let values = &self.data[base..base + self.image_len()];
        let width = self.width as u32;

        Ok(RgbImage::from_fn(width, self.height as u32, |x, y| {
            let i = y as usize * self.width + x as usize;
            Rgb([
                denormalize(values[i]),
                denormalize(values[plane + i]),
                denormalize(values[2 * plane + i]),
            ])
        }))
    }

    /// Split the batch back into rasters, preserving order.
    pub fn to_images(&self) -> Result<Vec<RgbImage>> {
        (0..self.batch).map(|n| self.to_image(n)).collect()
    }
}

fn denormalize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0).round() as u8
}

/// Reflection-pad a raster on the right and bottom up to `width`×`height`.
///
/// The edge row/column is not repeated (`abc|ba`), matching what fixed-shape
/// models were trained against.
pub fn pad_reflect(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    if src_w >= width && src_h >= height {
        return image.clone();
    }
    let width = width.max(src_w);
    let height = height.max(src_h);
    RgbImage::from_fn(width, height, |x, y| {
        *image.get_pixel(reflect(x, src_w), reflect(y, src_h))
    })
}

fn reflect(index: u32, extent: u32) -> u32 {
    if extent <= 1 {
        return 0;
    }
    let period = 2 * (extent - 1);
    let folded = index % period;
    if folded < extent {
        folded
    } else {
        period - folded
    }
}
