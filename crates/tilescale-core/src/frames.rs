//! Upscaling sequences of frames.
//!
//! Frames that share a shape and fit in one tile are stacked into a single
//! model call; anything else goes through the tiled path one frame at a time.
//!
//! Library API for callers that already hold decoded frames, such as a video
//! decoder. The `tilescale` binary works on image files and does not use it.

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, UpscaleError};
use crate::model::UpscaleModel;
use crate::raster::lanczos_upscale;
use crate::tiling::TiledUpscaler;

/// Counts from one [`upscale_frames`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frames: usize,
    pub direct_batches: usize,
    pub tiled_frames: usize,
    pub fallback_frames: usize,
}

/// Upscale `frames` in chunks of `batch_size`, preserving order.
///
/// A failed direct batch is retried frame by frame through the tiled path;
/// a frame that still fails becomes a Lanczos3 resize. Only cancellation
/// aborts the run.
pub fn upscale_frames<M: UpscaleModel>(
    engine: &mut TiledUpscaler<M>,
    frames: &[RgbImage],
    batch_size: usize,
) -> Result<(Vec<RgbImage>, FrameReport)> {
    let batch_size = batch_size.max(1);
    let tile_size = engine.params().tile_size;
    let mut report = FrameReport {
        frames: frames.len(),
        ..Default::default()
    };
    let mut output = Vec::with_capacity(frames.len());

    for chunk in frames.chunks(batch_size) {
        let (w, h) = chunk[0].dimensions();
        let batchable = chunk.len() > 1
            && w <= tile_size
            && h <= tile_size
            && chunk.iter().all(|f| f.dimensions() == (w, h));

        if batchable {
            let refs: Vec<&RgbImage> = chunk.iter().collect();
            match engine.upscale_batch_direct(&refs) {
                Ok(upscaled) if upscaled.len() == chunk.len() => {
                    debug!("Upscaled {} frames in one batch", chunk.len());
                    report.direct_batches += 1;
                    output.extend(upscaled);
                    continue;
                }
                Ok(upscaled) => warn!(
                    "Batch returned {} frames for {} inputs, processing individually",
                    upscaled.len(),
                    chunk.len()
                ),
                Err(UpscaleError::Cancelled) => return Err(UpscaleError::Cancelled),
                Err(e) => warn!("Frame batch failed ({}), processing individually", e),
            }
        }

        for frame in chunk {
            output.push(upscale_one(engine, frame, &mut report)?);
        }
    }

    Ok((output, report))
}

fn upscale_one<M: UpscaleModel>(
    engine: &mut TiledUpscaler<M>,
    frame: &RgbImage,
    report: &mut FrameReport,
) -> Result<RgbImage> {
    match engine.upscale(frame) {
        Ok(outcome) => {
            report.tiled_frames += 1;
            Ok(outcome.image)
        }
        Err(UpscaleError::Cancelled) => Err(UpscaleError::Cancelled),
        Err(e) => {
            warn!("Frame failed ({}), falling back to Lanczos", e);
            report.fallback_frames += 1;
            Ok(lanczos_upscale(frame, engine.scale()))
        }
    }
}
