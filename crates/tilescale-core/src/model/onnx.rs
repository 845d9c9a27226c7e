//! ONNX Runtime backend.
//!
//! Loads an exported super-resolution network (Real-ESRGAN, AnimeJaNai and
//! similar) and runs normalized batches through it. FP16 graphs are fed
//! `half::f16` tensors; everything else runs in FP32.

use std::path::Path;

use half::f16;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, TensorElementType, ValueType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::registry::scale_from_name;
use super::{InputShape, UpscaleModel};
use crate::error::{Result, UpscaleError};
use crate::tiling::TensorBatch;

/// Pixel value range a network was trained on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    /// Values in `[0, 1]`.
    #[default]
    Unit,
    /// Values in `[0, 255]`.
    Byte,
}

impl ValueRange {
    fn factor(self) -> f32 {
        match self {
            ValueRange::Unit => 1.0,
            ValueRange::Byte => 255.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueRange::Unit => "unit",
            ValueRange::Byte => "byte",
        }
    }
}

impl std::str::FromStr for ValueRange {
    type Err = UpscaleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unit" | "0-1" => Ok(ValueRange::Unit),
            "byte" | "0-255" => Ok(ValueRange::Byte),
            other => Err(UpscaleError::validation(
                "value_range",
                format!("unknown value range '{other}' (expected unit or byte)"),
            )),
        }
    }
}

/// Session options for [`OnnxUpscaler::load`].
#[derive(Debug, Clone, Default)]
pub struct OnnxOptions {
    /// Upscale factor. Inferred from the file name (`x4`, `2x`) when unset.
    pub scale: Option<u32>,
    pub value_range: ValueRange,
    /// Intra-op thread count; ONNX Runtime picks when unset.
    pub intra_threads: Option<usize>,
}

/// A super-resolution network executed by ONNX Runtime.
pub struct OnnxUpscaler {
    session: Session,
    name: String,
    input_name: String,
    output_name: String,
    scale: u32,
    input_shape: InputShape,
    is_fp16: bool,
    value_range: ValueRange,
}

impl std::fmt::Debug for OnnxUpscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxUpscaler")
            .field("name", &self.name)
            .field("scale", &self.scale)
            .field("input_shape", &self.input_shape)
            .field("is_fp16", &self.is_fp16)
            .field("value_range", &self.value_range)
            .finish()
    }
}

impl OnnxUpscaler {
    /// Load a model file and inspect its IO signature.
    pub fn load(path: &Path, options: &OnnxOptions) -> Result<Self> {
        if !path.exists() {
            return Err(UpscaleError::FileNotFound(path.to_path_buf()));
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        let scale = match options.scale.or_else(|| scale_from_name(&name)) {
            Some(scale) => scale,
            None => {
                warn!("Could not infer scale from '{}', assuming 4x", name);
                4
            }
        };

        debug!(model = %path.display(), scale, "Loading ONNX super-resolution model");

        let builder =
            Session::builder().map_err(|e| UpscaleError::model("create session builder", e))?;
        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| UpscaleError::model("set optimization level", e))?;
        let mut builder = match options.intra_threads {
            Some(threads) => builder
                .with_intra_threads(threads)
                .map_err(|e| UpscaleError::model("set intra-op threads", e))?,
            None => builder,
        };
        let session = builder
            .commit_from_file(path)
            .map_err(|e| UpscaleError::model(&format!("load {}", path.display()), e))?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| UpscaleError::Model {
                message: format!("{} declares no inputs", path.display()),
            })?;
        let input_name = input.name().to_string();
        let (is_fp16, input_shape) = match input.dtype() {
            ValueType::Tensor { ty, shape, .. } => {
                let dims: Vec<i64> = shape.iter().copied().collect();
                (*ty == TensorElementType::Float16, fixed_spatial_shape(&dims))
            }
            _ => (false, InputShape::Dynamic),
        };
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| UpscaleError::Model {
                message: format!("{} declares no outputs", path.display()),
            })?;

        info!(
            %input_name, %output_name, is_fp16, ?input_shape,
            "Loaded model {}", name
        );

        Ok(Self {
            session,
            name,
            input_name,
            output_name,
            scale,
            input_shape,
            is_fp16,
            value_range: options.value_range,
        })
    }

    pub fn is_fp16(&self) -> bool {
        self.is_fp16
    }

    fn run_fp32(&mut self, shape: Vec<i64>, data: Vec<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
        let tensor = Tensor::from_array((shape, data))
            .map_err(|e| UpscaleError::model("build input tensor", e))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &tensor])
            .map_err(|e| UpscaleError::model("run session", e))?;
        let (dims, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| UpscaleError::model("extract output tensor", e))?;
        Ok((dims.iter().copied().collect(), values.to_vec()))
    }

    fn run_fp16(&mut self, shape: Vec<i64>, data: Vec<f16>) -> Result<(Vec<i64>, Vec<f32>)> {
        let tensor = Tensor::from_array((shape, data))
            .map_err(|e| UpscaleError::model("build input tensor", e))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &tensor])
            .map_err(|e| UpscaleError::model("run session", e))?;
        let (dims, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f16>()
            .map_err(|e| UpscaleError::model("extract output tensor", e))?;
        Ok((
            dims.iter().copied().collect(),
            values.iter().map(|v| v.to_f32()).collect(),
        ))
    }
}

impl UpscaleModel for OnnxUpscaler {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let factor = self.value_range.factor();

        let (dims, mut values) = if self.is_fp16 {
            let data = batch.data.iter().map(|v| f16::from_f32(v * factor)).collect();
            self.run_fp16(shape, data)?
        } else {
            let data = batch.data.iter().map(|v| v * factor).collect();
            self.run_fp32(shape, data)?
        };

        let scale = self.scale as usize;
        let expected = [batch.batch, 3, batch.height * scale, batch.width * scale];
        let actual: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
        if actual != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: expected.to_vec(),
                actual,
            });
        }

        if factor != 1.0 {
            values.iter_mut().for_each(|v| *v /= factor);
        }
        TensorBatch::from_raw(values, expected)
    }
}

/// A 4-D NCHW input with positive spatial dims is fixed; `-1` marks dynamic.
fn fixed_spatial_shape(dims: &[i64]) -> InputShape {
    match dims {
        [_, _, h, w] if *h > 0 && *w > 0 => InputShape::Fixed {
            width: *w as u32,
            height: *h as u32,
        },
        _ => InputShape::Dynamic,
    }
}
