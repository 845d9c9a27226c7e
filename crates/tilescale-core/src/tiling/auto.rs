//! Tile parameters derived from image size and device memory.

use tracing::debug;

use super::params::TileParams;
use crate::config::TileDefaults;
use crate::system::{DeviceKind, DeviceProfile};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Fraction of CUDA memory the engine may plan for.
const CUDA_USABLE_FRACTION: f64 = 0.7;

/// Pick tile and batch sizes for a `width`×`height` raster at `scale`.
///
/// Memory is estimated as the float32 output times a 4x safety factor.
/// Images that would eat a large share of the budget get small tiles; small
/// images get large ones. Tiles are rounded down to a multiple of 32.
pub fn optimal_params(width: u32, height: u32, device: &DeviceProfile, scale: u32) -> TileParams {
    let pixels = width as u64 * height as u64;
    let scaled = pixels * (scale as u64).pow(2);
    let estimated_gib = (scaled * 3 * 4 * 4) as f64 / GIB;
    let short_side = width.min(height);

    let tile = match device.kind {
        DeviceKind::Cuda => {
            let available = device.memory_bytes as f64 / GIB * CUDA_USABLE_FRACTION;
            if estimated_gib > available * 0.5 {
                (short_side / 8).clamp(128, 256)
            } else if pixels > 1024 * 1024 {
                (short_side / 4).clamp(256, 512)
            } else {
                (short_side / 2).clamp(512, 1024)
            }
        }
        DeviceKind::AppleSilicon => {
            let available = device.memory_bytes as f64 / GIB;
            if estimated_gib > available * 0.4 {
                (short_side / 10).clamp(100, 200)
            } else if pixels > 512 * 512 {
                (short_side / 6).clamp(150, 300)
            } else {
                (short_side / 3).clamp(200, 400)
            }
        }
        DeviceKind::Cpu => {
            let available = device.memory_bytes as f64 / GIB;
            if estimated_gib > available * 0.3 {
                (short_side / 12).clamp(75, 150)
            } else if pixels > 256 * 256 {
                (short_side / 8).clamp(128, 256)
            } else {
                (short_side / 4).clamp(200, 350)
            }
        }
    };
    let tile = (tile / 32 * 32).max(64);

    let batch_size = match device.kind {
        DeviceKind::Cuda if tile >= 512 => 2,
        DeviceKind::Cuda if tile >= 256 => 4,
        DeviceKind::Cuda => 8,
        DeviceKind::AppleSilicon if tile >= 300 => 1,
        DeviceKind::AppleSilicon if tile >= 200 => 2,
        DeviceKind::AppleSilicon => 4,
        DeviceKind::Cpu if tile >= 256 => 1,
        DeviceKind::Cpu if tile >= 150 => 2,
        DeviceKind::Cpu => 4,
    };

    let overlap = TileDefaults::OVERLAP.min(tile / 4);
    debug!(
        device = %device.kind,
        estimated_gib,
        tile,
        overlap,
        batch_size,
        "Derived tile parameters for {}x{} at {}x",
        width,
        height,
        scale
    );

    TileParams::new(tile, overlap).with_batch_size(batch_size)
}
