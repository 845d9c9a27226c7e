//! The tiled inference coordinator.
//!
//! [`TiledUpscaler`] owns a model and runs rasters through it tile by tile:
//!
//! 1. Plan the grid ([`TilePlan`]) and check the output fits in memory.
//! 2. Group consecutive same-shaped tiles into batches and infer them.
//! 3. Place each upscaled tile on a [`Canvas`], blending overlap bands.
//! 4. Fill undersized edge tiles by classical resize where no model output
//!    landed.
//!
//! A tile the model cannot handle is replaced by a Lanczos3 resize of the
//! same region; the run carries on.

use std::time::Instant;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::blend::{Bands, Canvas};
use super::params::TileParams;
use super::plan::{TilePlan, TileRect};
use super::tensor::{pad_reflect, TensorBatch};
use crate::cancel::CancellationToken;
use crate::config::{EngineLimits, TileDefaults};
use crate::error::{Result, UpscaleError};
use crate::model::{InputShape, UpscaleModel};
use crate::raster::{crop, lanczos_upscale, output_bytes};
use crate::timing::TileTimings;

/// What happened during one upscale.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpscaleReport {
    /// The raster went to the model in one call.
    pub direct: bool,
    pub tiles_total: usize,
    pub tiles_inferred: usize,
    pub tiles_fallback: usize,
    pub tiles_undersized: usize,
    /// Number of model calls, individual retries included.
    pub batches: usize,
    pub timings: TileTimings,
    pub elapsed_secs: f64,
}

/// Result image plus its report.
#[derive(Debug, Clone)]
pub struct UpscaleOutcome {
    pub image: RgbImage,
    pub report: UpscaleReport,
}

/// Runs rasters through an [`UpscaleModel`] in overlapping tiles.
pub struct TiledUpscaler<M: UpscaleModel> {
    model: M,
    params: TileParams,
    cancel: CancellationToken,
}

impl<M: UpscaleModel> TiledUpscaler<M> {
    /// Pair a loaded model with tiling parameters.
    ///
    /// For fixed-shape models the tile size is capped at the model's input
    /// size.
    pub fn new(model: M, params: TileParams) -> Result<Self> {
        let scale = model.scale();
        if scale == 0 || scale > EngineLimits::MAX_SCALE {
            return Err(UpscaleError::validation(
                "scale",
                format!("model scale {} outside 1..={}", scale, EngineLimits::MAX_SCALE),
            ));
        }

        let params = fit_params(&model, params)?;
        Ok(Self {
            model,
            params,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the tiling parameters, e.g. per image after auto-tuning.
    pub fn set_params(&mut self, params: TileParams) -> Result<()> {
        self.params = fit_params(&self.model, params)?;
        Ok(())
    }

    /// Use `token` to stop the run between batches.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn params(&self) -> &TileParams {
        &self.params
    }

    pub fn scale(&self) -> u32 {
        self.model.scale()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// The grid this engine would use for a `width`×`height` raster.
    pub fn plan(&self, width: u32, height: u32) -> Result<TilePlan> {
        TilePlan::new(width, height, self.scale(), &self.params)
    }

    /// Upscale `image` by the model's scale factor.
    pub fn upscale(&mut self, image: &RgbImage) -> Result<UpscaleOutcome> {
        let started = Instant::now();
        let (width, height) = image.dimensions();
        let scale = self.scale();
        let plan = self.plan(width, height)?;

        let bytes = canvas_bytes(width, height, scale);
        if bytes > EngineLimits::MAX_OUTPUT_BYTES {
            return Err(UpscaleError::OutputTooLarge {
                bytes,
                limit: EngineLimits::MAX_OUTPUT_BYTES,
            });
        }
        self.cancel.check()?;

        let mut report = UpscaleReport {
            direct: plan.direct,
            tiles_total: plan.len(),
            ..Default::default()
        };

        let image = if plan.direct {
            debug!("Direct inference on {}x{} with '{}'", width, height, self.model.name());
            let tile_started = Instant::now();
            report.batches += 1;
            let upscaled = match self.infer_tiles(&[image]) {
                Ok(mut outputs) if !outputs.is_empty() => {
                    report.tiles_inferred += 1;
                    outputs.swap_remove(0)
                }
                Ok(_) => {
                    report.tiles_fallback += 1;
                    warn!("Model returned no image, falling back to Lanczos");
                    lanczos_upscale(image, scale)
                }
                Err(e) => {
                    report.tiles_fallback += 1;
                    warn!("Direct inference failed ({}), falling back to Lanczos", e);
                    lanczos_upscale(image, scale)
                }
            };
            report.timings.record(tile_started.elapsed());
            upscaled
        } else {
            info!(
                "Tiling {}x{} into {}x{} grid ({} tiles, tile {}, overlap {})",
                width,
                height,
                plan.columns,
                plan.rows,
                plan.len(),
                self.params.tile_size,
                self.params.overlap
            );
            self.upscale_tiled(image, &plan, &mut report)?
        };

        report.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "Upscaled {}x{} -> {}x{} in {:.2}s ({} inferred, {} fallback, {} undersized)",
            width,
            height,
            image.width(),
            image.height(),
            report.elapsed_secs,
            report.tiles_inferred,
            report.tiles_fallback,
            report.tiles_undersized
        );
        Ok(UpscaleOutcome { image, report })
    }

    /// Infer a batch of same-shaped rasters that each fit in one tile.
    ///
    /// No fallback is applied; callers decide how to degrade.
    pub fn upscale_batch_direct(&mut self, images: &[&RgbImage]) -> Result<Vec<RgbImage>> {
        if let Some(first) = images.first() {
            let (w, h) = first.dimensions();
            if w > self.params.tile_size || h > self.params.tile_size {
                return Err(UpscaleError::validation(
                    "batch",
                    format!("{}x{} does not fit a {} tile", w, h, self.params.tile_size),
                ));
            }
        }
        self.cancel.check()?;
        self.infer_tiles(images)
    }

    fn upscale_tiled(
        &mut self,
        image: &RgbImage,
        plan: &TilePlan,
        report: &mut UpscaleReport,
    ) -> Result<RgbImage> {
        let (out_w, out_h) = plan.output_dimensions();
        let mut canvas = Canvas::new(out_w, out_h, self.params.blend_floor);
        let progress_every = plan.len().div_ceil(TileDefaults::PROGRESS_STEPS).max(1);

        let mut pending: Vec<TileRect> = Vec::with_capacity(self.params.batch_size);
        let mut undersized = Vec::new();
        let mut processed = 0;

        for tile in &plan.tiles {
            if !tile.is_viable(self.params.min_tile) {
                debug!(
                    "Tile {} at ({}, {}) is {}x{}, below min {}; deferring to resize",
                    tile.index, tile.x, tile.y, tile.width, tile.height, self.params.min_tile
                );
                undersized.push(*tile);
                continue;
            }
            let same_shape = pending.first().map_or(true, |p| p.shape() == tile.shape());
            if !same_shape || pending.len() >= self.params.batch_size {
                processed += self.flush(image, &pending, &mut canvas, report)?;
                pending.clear();
                self.log_progress(processed, plan.len(), progress_every, report);
            }
            pending.push(*tile);
        }
        if !pending.is_empty() {
            processed += self.flush(image, &pending, &mut canvas, report)?;
            self.log_progress(processed, plan.len(), progress_every, report);
        }

        let scale = plan.scale;
        for tile in &undersized {
            let region = crop(image, tile.x, tile.y, tile.width, tile.height);
            let filled = canvas.fill_uncovered(
                tile.x * scale,
                tile.y * scale,
                &lanczos_upscale(&region, scale),
            );
            debug!("Undersized tile {} filled {} pixels", tile.index, filled);
        }
        report.tiles_undersized = undersized.len();

        if !canvas.is_complete() {
            warn!("{} output pixels were not covered by any tile", canvas.uncovered_count());
        }
        Ok(canvas.into_image())
    }

    /// Infer one batch of tiles and place the results. Returns tiles handled.
    fn flush(
        &mut self,
        image: &RgbImage,
        tiles: &[TileRect],
        canvas: &mut Canvas,
        report: &mut UpscaleReport,
    ) -> Result<usize> {
        if tiles.is_empty() {
            return Ok(0);
        }
        self.cancel.check()?;

        let crops: Vec<RgbImage> = tiles
            .iter()
            .map(|t| crop(image, t.x, t.y, t.width, t.height))
            .collect();
        let refs: Vec<&RgbImage> = crops.iter().collect();

        let started = Instant::now();
        report.batches += 1;
        match self.infer_tiles(&refs) {
            Ok(outputs) => {
                let per_tile = started.elapsed() / tiles.len() as u32;
                for (tile, upscaled) in tiles.iter().zip(&outputs) {
                    debug!("Tile {} inferred ({}x{})", tile.index, tile.width, tile.height);
                    self.place(canvas, tile, upscaled);
                    report.tiles_inferred += 1;
                    report.timings.record(per_tile);
                }
            }
            Err(e) if tiles.len() > 1 => {
                warn!(
                    "Batch of {} tiles failed ({}), retrying individually",
                    tiles.len(),
                    e
                );
                for (tile, region) in tiles.iter().zip(&crops) {
                    let tile_started = Instant::now();
                    report.batches += 1;
                    let upscaled = match self.infer_tiles(&[region]) {
                        Ok(mut outputs) if !outputs.is_empty() => {
                            report.tiles_inferred += 1;
                            outputs.swap_remove(0)
                        }
                        Ok(_) => self.fallback(tile, region, "empty model output", report),
                        Err(e) => self.fallback(tile, region, &e.to_string(), report),
                    };
                    self.place(canvas, tile, &upscaled);
                    report.timings.record(tile_started.elapsed());
                }
            }
            Err(e) => {
                let upscaled = self.fallback(&tiles[0], &crops[0], &e.to_string(), report);
                self.place(canvas, &tiles[0], &upscaled);
                report.timings.record(started.elapsed());
            }
        }
        Ok(tiles.len())
    }

    fn fallback(
        &self,
        tile: &TileRect,
        region: &RgbImage,
        reason: &str,
        report: &mut UpscaleReport,
    ) -> RgbImage {
        warn!(
            "Tile {} at ({}, {}) failed ({}), falling back to Lanczos",
            tile.index, tile.x, tile.y, reason
        );
        report.tiles_fallback += 1;
        lanczos_upscale(region, self.scale())
    }

    fn place(&self, canvas: &mut Canvas, tile: &TileRect, upscaled: &RgbImage) {
        let scale = self.scale();
        let band = self.params.overlap * scale;
        let bands = Bands {
            left: if tile.x > 0 { band.min(upscaled.width()) } else { 0 },
            top: if tile.y > 0 { band.min(upscaled.height()) } else { 0 },
        };
        canvas.place(tile.x * scale, tile.y * scale, upscaled, bands);
    }

    /// Spatial size the model must see for a `width`×`height` tile.
    fn model_input_size(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        match self.model.input_shape() {
            InputShape::Fixed {
                width: fw,
                height: fh,
            } => {
                if width > fw || height > fh {
                    return Err(UpscaleError::ShapeMismatch {
                        expected: vec![fh as usize, fw as usize],
                        actual: vec![height as usize, width as usize],
                    });
                }
                Ok((fw, fh))
            }
            InputShape::Dynamic if self.params.pad_to_tile => Ok((
                width.max(self.params.tile_size),
                height.max(self.params.tile_size),
            )),
            InputShape::Dynamic => Ok((width, height)),
        }
    }

    /// Run same-shaped rasters through the model and check what comes back.
    fn infer_tiles(&mut self, inputs: &[&RgbImage]) -> Result<Vec<RgbImage>> {
        let first = inputs
            .first()
            .ok_or_else(|| UpscaleError::validation("batch", "cannot infer an empty batch"))?;
        let (width, height) = first.dimensions();
        let (in_w, in_h) = self.model_input_size(width, height)?;
        let padded = (in_w, in_h) != (width, height);

        let padded_inputs: Vec<RgbImage> = if padded {
            inputs.iter().map(|i| pad_reflect(i, in_w, in_h)).collect()
        } else {
            Vec::new()
        };
        let batch = if padded {
            TensorBatch::from_images(&padded_inputs.iter().collect::<Vec<_>>())?
        } else {
            TensorBatch::from_images(inputs)?
        };

        let output = self.model.infer(&batch)?;

        let scale = self.scale() as usize;
        let expected = [inputs.len(), 3, in_h as usize * scale, in_w as usize * scale];
        if output.shape() != expected {
            return Err(UpscaleError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: output.shape().to_vec(),
            });
        }
        if !output.is_finite() {
            return Err(UpscaleError::Model {
                message: "model produced non-finite values".to_string(),
            });
        }

        let images = output.to_images()?;
        if padded {
            let scale = self.scale();
            Ok(images
                .iter()
                .map(|i| crop(i, 0, 0, width * scale, height * scale))
                .collect())
        } else {
            Ok(images)
        }
    }

    fn log_progress(&self, processed: usize, total: usize, every: usize, report: &UpscaleReport) {
        if processed == 0 || (processed % every != 0 && processed != total) {
            return;
        }
        let percent = processed as f64 / total as f64 * 100.0;
        info!(
            "Progress: {}/{} tiles ({:.0}%), last {:.2}s/tile, ETA {:.1}s",
            processed,
            total,
            percent,
            report.timings.average_secs(),
            report.timings.eta_secs(total.saturating_sub(processed))
        );
    }
}

/// Bytes held while assembling the output: the RGB8 raster plus one
/// coverage flag per output pixel.
fn canvas_bytes(width: u32, height: u32, scale: u32) -> u64 {
    let pixels = width as u64 * scale as u64 * height as u64 * scale as u64;
    output_bytes(width, height, scale) + pixels
}

/// Cap tile geometry to a fixed-shape model's input and validate.
fn fit_params<M: UpscaleModel>(model: &M, mut params: TileParams) -> Result<TileParams> {
    if let InputShape::Fixed { width, height } = model.input_shape() {
        let side = width.min(height);
        if params.tile_size > side {
            warn!(
                "Model '{}' takes fixed {}x{} input; reducing tile size {} -> {}",
                model.name(),
                width,
                height,
                params.tile_size,
                side
            );
            params.tile_size = side;
            if params.overlap >= side {
                params.overlap = side / 4;
            }
            params.min_tile = params.min_tile.min(side);
        }
    }
    params.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Nearest-neighbour model that records the shapes it receives.
    struct Nearest {
        scale: u32,
        shape: InputShape,
        calls: Vec<[usize; 4]>,
    }

    impl Nearest {
        fn new(scale: u32) -> Self {
            Self {
                scale,
                shape: InputShape::Dynamic,
                calls: Vec::new(),
            }
        }
    }

    impl UpscaleModel for Nearest {
        fn name(&self) -> &str {
            "nearest"
        }

        fn scale(&self) -> u32 {
            self.scale
        }

        fn input_shape(&self) -> InputShape {
            self.shape
        }

        fn infer(&mut self, batch: &TensorBatch) -> Result<TensorBatch> {
            self.calls.push(batch.shape());
            let s = self.scale as usize;
            let (h, w) = (batch.height * s, batch.width * s);
            let mut out = TensorBatch::zeros(batch.batch, batch.channels, h, w);
            for n in 0..batch.batch {
                for c in 0..batch.channels {
                    for y in 0..h {
                        for x in 0..w {
                            let src = ((n * batch.channels + c) * batch.height + y / s)
                                * batch.width
                                + x / s;
                            let dst = ((n * batch.channels + c) * h + y) * w + x;
                            out.data[dst] = batch.data[src];
                        }
                    }
                }
            }
            Ok(out)
        }
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
        })
    }

    #[test]
    fn test_direct_path_single_call() {
        let mut engine = TiledUpscaler::new(Nearest::new(2), TileParams::new(64, 8)).unwrap();
        let outcome = engine.upscale(&gradient(40, 30)).unwrap();

        assert!(outcome.report.direct);
        assert_eq!(outcome.image.dimensions(), (80, 60));
        assert_eq!(engine.model().calls, vec![[1, 3, 30, 40]]);
    }

    #[test]
    fn test_same_shape_tiles_are_batched() {
        let params = TileParams::new(32, 8).with_batch_size(4).with_min_tile(4);
        let mut engine = TiledUpscaler::new(Nearest::new(2), params).unwrap();
        // stride 24: columns at 0,24,48,72 (last is 24 wide), rows at 0,24 (last 24 tall)
        let outcome = engine.upscale(&gradient(96, 48)).unwrap();

        assert_eq!(outcome.report.tiles_total, 8);
        assert_eq!(outcome.report.tiles_inferred, 8);
        let calls = &engine.model().calls;
        assert_eq!(calls[0], [3, 3, 32, 32]);
        assert_eq!(calls[1], [1, 3, 32, 24]);
        assert_eq!(calls.iter().map(|c| c[0]).sum::<usize>(), 8);
    }

    #[test]
    fn test_pad_to_tile_sends_full_tiles() {
        let params = TileParams::new(32, 8).with_pad_to_tile(true).with_min_tile(4);
        let mut engine = TiledUpscaler::new(Nearest::new(2), params).unwrap();
        let outcome = engine.upscale(&gradient(50, 40)).unwrap();

        assert_eq!(outcome.image.dimensions(), (100, 80));
        assert!(engine.model().calls.iter().all(|c| c[2] == 32 && c[3] == 32));
    }

    #[test]
    fn test_fixed_shape_caps_tile_size() {
        let mut model = Nearest::new(2);
        model.shape = InputShape::Fixed {
            width: 48,
            height: 48,
        };
        let engine = TiledUpscaler::new(model, TileParams::new(512, 64)).unwrap();
        assert_eq!(engine.params().tile_size, 48);
        assert_eq!(engine.params().overlap, 12);
    }

    #[test]
    fn test_cancelled_run_stops() {
        let token = CancellationToken::new();
        token.cancel();
        let mut engine = TiledUpscaler::new(Nearest::new(2), TileParams::new(32, 8))
            .unwrap()
            .with_cancellation(token);
        let err = engine.upscale(&gradient(100, 100)).unwrap_err();
        assert!(matches!(err, UpscaleError::Cancelled));
    }

    #[test]
    fn test_output_guard_rejects_before_inference() {
        let mut engine = TiledUpscaler::new(Nearest::new(8), TileParams::default()).unwrap();
        // 8000x6000 at 8x needs about 9.2 GB of RGB8
        let err = engine.upscale(&RgbImage::new(8000, 6000)).unwrap_err();
        assert!(matches!(err, UpscaleError::OutputTooLarge { .. }));
        assert!(err.is_resource_exhaustion());
        assert!(engine.model().calls.is_empty());
    }

    #[test]
    fn test_output_guard_counts_coverage_mask() {
        // 48000x52000 RGB8 is about 7.0 GiB, plus 2.3 GiB of coverage flags
        let (width, height, scale) = (6000, 6500, 8);
        assert!(output_bytes(width, height, scale) <= EngineLimits::MAX_OUTPUT_BYTES);
        assert!(canvas_bytes(width, height, scale) > EngineLimits::MAX_OUTPUT_BYTES);

        let mut engine = TiledUpscaler::new(Nearest::new(scale), TileParams::default()).unwrap();
        let err = engine.upscale(&RgbImage::new(width, height)).unwrap_err();
        assert!(matches!(err, UpscaleError::OutputTooLarge { .. }));
        assert!(engine.model().calls.is_empty());
    }

    #[test]
    fn test_scale_out_of_range_rejected() {
        assert!(TiledUpscaler::new(Nearest::new(16), TileParams::default()).is_err());
    }
}
