//! Raster helpers: decode, encode, crop and classical resize.
//!
//! Everything in the engine works on 8-bit RGB (`image::RgbImage`); alpha and
//! high bit depths are flattened on load.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Result, UpscaleError};

/// Decode an image file into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    if !path.exists() {
        return Err(UpscaleError::FileNotFound(path.to_path_buf()));
    }
    let decoded = image::open(path).map_err(|e| UpscaleError::Image {
        message: format!("Failed to decode {}: {}", path.display(), e),
        source: Some(e),
    })?;
    let rgb = decoded.to_rgb8();
    debug!(
        "Loaded {} ({}x{})",
        path.display(),
        rgb.width(),
        rgb.height()
    );
    Ok(rgb)
}

/// Read width and height from the file header without decoding pixels.
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    if !path.exists() {
        return Err(UpscaleError::FileNotFound(path.to_path_buf()));
    }
    image::image_dimensions(path).map_err(|e| UpscaleError::Image {
        message: format!("Failed to read header of {}: {}", path.display(), e),
        source: Some(e),
    })
}

/// Encode an RGB raster, creating the parent directory when needed.
///
/// The format follows the output extension.
pub fn save_rgb(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| UpscaleError::io_with_path(e, parent))?;
        }
    }
    image.save(path).map_err(|e| UpscaleError::Image {
        message: format!("Failed to encode {}: {}", path.display(), e),
        source: Some(e),
    })?;
    debug!("Saved {} ({}x{})", path.display(), image.width(), image.height());
    Ok(())
}

/// Copy a rectangular region out of a raster.
pub fn crop(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Classical Lanczos3 upscale by an integer factor.
///
/// This is the fallback for tiles the model cannot handle.
pub fn lanczos_upscale(image: &RgbImage, scale: u32) -> RgbImage {
    imageops::resize(
        image,
        image.width() * scale,
        image.height() * scale,
        FilterType::Lanczos3,
    )
}

/// `<dir>/<stem>_upscaled.<ext>` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file_name = match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, AppConfig::UPSCALED_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}.png", stem, AppConfig::UPSCALED_SUFFIX),
    };
    input.with_file_name(file_name)
}

/// Size in bytes of an RGB8 raster upscaled by `scale`.
pub fn output_bytes(width: u32, height: u32, scale: u32) -> u64 {
    width as u64 * scale as u64 * height as u64 * scale as u64 * 3
}
