//! Deterministic fake models shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use tilescale_core::tiling::TensorBatch;
use tilescale_core::{InputShape, Result, UpscaleError, UpscaleModel};

/// Nearest-neighbour upscale. Local and pointwise, so tiling must not change
/// its output.
pub struct NearestModel {
    pub scale: u32,
}

impl UpscaleModel for NearestModel {
    fn name(&self) -> &str {
        "nearest"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        Ok(nearest(batch, self.scale as usize))
    }
}

pub fn nearest(batch: &TensorBatch, s: usize) -> TensorBatch {
    let (h, w) = (batch.height * s, batch.width * s);
    let mut out = TensorBatch::zeros(batch.batch, batch.channels, h, w);
    for plane in 0..batch.batch * batch.channels {
        let src = &batch.data[plane * batch.height * batch.width..];
        let dst = &mut out.data[plane * h * w..(plane + 1) * h * w];
        for y in 0..h {
            let row = (y / s) * batch.width;
            for x in 0..w {
                dst[y * w + x] = src[row + x / s];
            }
        }
    }
    out
}

/// Nearest-neighbour model that only accepts one spatial input size.
pub struct FixedShapeModel {
    pub scale: u32,
    pub width: u32,
    pub height: u32,
}

impl UpscaleModel for FixedShapeModel {
    fn name(&self) -> &str {
        "nearest-fixed"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Fixed {
            width: self.width,
            height: self.height,
        }
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        if (batch.width, batch.height) != (self.width as usize, self.height as usize) {
            return Err(UpscaleError::ShapeMismatch {
                expected: vec![self.height as usize, self.width as usize],
                actual: vec![batch.height, batch.width],
            });
        }
        Ok(nearest(batch, self.scale as usize))
    }
}

/// Returns a constant mid-grey without touching the input values.
pub struct FlatModel {
    pub scale: u32,
}

impl UpscaleModel for FlatModel {
    fn name(&self) -> &str {
        "flat"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        let s = self.scale as usize;
        let shape = [batch.batch, batch.channels, batch.height * s, batch.width * s];
        TensorBatch::from_raw(vec![0.5; shape.iter().product()], shape)
    }
}

/// Wraps a model and records every input shape it receives.
pub struct RecordingModel<M> {
    pub inner: M,
    pub calls: Arc<Mutex<Vec<[usize; 4]>>>,
}

impl<M> RecordingModel<M> {
    pub fn new(inner: M) -> (Self, Arc<Mutex<Vec<[usize; 4]>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl<M: UpscaleModel> UpscaleModel for RecordingModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn scale(&self) -> u32 {
        self.inner.scale()
    }

    fn input_shape(&self) -> InputShape {
        self.inner.input_shape()
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        self.calls.lock().unwrap().push(batch.shape());
        self.inner.infer(batch)
    }
}

/// How a [`FaultyModel`] misbehaves on the selected calls.
#[derive(Clone, Copy)]
pub enum Fault {
    Error,
    NotANumber,
    WrongShape,
}

/// Nearest-neighbour model that misbehaves on chosen call indices.
pub struct FaultyModel {
    pub scale: u32,
    pub fault: Fault,
    pub fail_calls: Vec<usize>,
    pub calls: usize,
}

impl FaultyModel {
    pub fn new(scale: u32, fault: Fault, fail_calls: Vec<usize>) -> Self {
        Self {
            scale,
            fault,
            fail_calls,
            calls: 0,
        }
    }

    pub fn always(scale: u32, fault: Fault) -> Self {
        Self::new(scale, fault, (0..10_000).collect())
    }
}

impl UpscaleModel for FaultyModel {
    fn name(&self) -> &str {
        "faulty"
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        let call = self.calls;
        self.calls += 1;
        let mut out = nearest(batch, self.scale as usize);
        if self.fail_calls.contains(&call) {
            match self.fault {
                Fault::Error => {
                    return Err(UpscaleError::Model {
                        message: format!("injected failure on call {call}"),
                    })
                }
                Fault::NotANumber => out.data[0] = f32::NAN,
                Fault::WrongShape => out = TensorBatch::zeros(batch.batch, 3, 2, 2),
            }
        }
        Ok(out)
    }
}

/// Deterministic texture with no black pixels.
pub fn textured(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            16 + ((x * 7 + y * 3) % 200) as u8,
            16 + ((x * 13) % 220) as u8,
            16 + ((y * 11) % 230) as u8,
        ])
    })
}

pub fn has_black_pixel(image: &RgbImage) -> bool {
    image.pixels().any(|p| *p == Rgb([0, 0, 0]))
}
