use super::UpscaleModel;
use crate::error::{Result, UpscaleError};
use crate::raster::lanczos_upscale;
use crate::tiling::TensorBatch;

/// Lanczos3 interpolation exposed as a model.
///
/// Serves as the `lanczos` model on the command line and as a baseline when
/// no network is available.
pub struct LanczosUpscaler {
    name: String,
    scale: u32,
}

impl LanczosUpscaler {
    pub fn new(scale: u32) -> Result<Self> {
        if scale == 0 {
            return Err(UpscaleError::validation("scale", "must be at least 1"));
        }
        Ok(Self {
            name: format!("lanczos-x{scale}"),
            scale,
        })
    }
}

impl UpscaleModel for LanczosUpscaler {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> u32 {
        self.scale
    }

    fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
        let upscaled: Vec<_> = batch
            .to_images()?
            .iter()
            .map(|image| lanczos_upscale(image, self.scale))
            .collect();
        let refs: Vec<_> = upscaled.iter().collect();
        TensorBatch::from_images(&refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_output_shape() {
        let mut model = LanczosUpscaler::new(2).unwrap();
        let img = RgbImage::from_pixel(10, 6, Rgb([40, 80, 120]));
        let out = model.infer(&TensorBatch::from_images(&[&img, &img]).unwrap()).unwrap();
        assert_eq!(out.shape(), [2, 3, 12, 20]);
    }

    #[test]
    fn test_flat_color_preserved() {
        let mut model = LanczosUpscaler::new(4).unwrap();
        let img = RgbImage::from_pixel(5, 5, Rgb([40, 80, 120]));
        let out = model.infer(&TensorBatch::from_images(&[&img]).unwrap()).unwrap();
        let up = out.to_image(0).unwrap();
        assert!(up.pixels().all(|p| *p == Rgb([40, 80, 120])));
    }

    #[test]
    fn test_zero_scale_rejected() {
        assert!(LanczosUpscaler::new(0).is_err());
    }
}
