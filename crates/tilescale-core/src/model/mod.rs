//! Super-resolution models.
//!
//! The engine only sees [`UpscaleModel`]: a fixed integer scale and a batched
//! `infer` call over normalized NCHW tensors.
//!
//! - [`OnnxUpscaler`]: ONNX Runtime session (ESRGAN-family exports, FP32 or FP16)
//! - [`LanczosUpscaler`]: classical resize behind the same interface
//! - [`registry`]: resolving a model name to a file on disk

mod classical;
mod onnx;
pub mod registry;

pub use classical::LanczosUpscaler;
pub use onnx::{OnnxOptions, OnnxUpscaler, ValueRange};
pub use registry::{discover_models, resolve_model, ModelEntry, ModelRegistry, ResolvedModel};

use crate::error::Result;
use crate::tiling::TensorBatch;

/// Spatial input constraint reported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// Any height and width.
    Dynamic,
    /// The model only accepts exactly this spatial size.
    Fixed { width: u32, height: u32 },
}

/// A model mapping `N×3×h×w` to `N×3×(h·S)×(w·S)`.
pub trait UpscaleModel: Send {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Fixed output/input resolution ratio.
    fn scale(&self) -> u32;

    fn input_shape(&self) -> InputShape {
        InputShape::Dynamic
    }

    /// Run one batch. Input and output values are in `[0, 1]`.
    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch>;
}

impl<M: UpscaleModel + ?Sized> UpscaleModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn scale(&self) -> u32 {
        (**self).scale()
    }

    fn input_shape(&self) -> InputShape {
        (**self).input_shape()
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        (**self).infer(batch)
    }
}
