//! `tilescale upscale`: one image in, one image out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tilescale_core::raster::{default_output_path, load_rgb, save_rgb};
use tilescale_core::{CancellationToken, PerformanceTracker, TiledUpscaler, UpscaleReport};
use tracing::info;

use super::{ModelArgs, TileArgs};

#[derive(Args, Debug, Clone)]
pub struct UpscaleArgs {
    /// Image to upscale
    pub input: PathBuf,

    /// Output path (defaults to <stem>_upscaled.<ext> next to the input)
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub tiles: TileArgs,
}

pub async fn run(args: UpscaleArgs, cancel: CancellationToken) -> Result<()> {
    tokio::task::spawn_blocking(move || upscale_file(&args, cancel))
        .await
        .context("Upscale task panicked")?
        .map(|report| print_report(&report))
}

fn upscale_file(args: &UpscaleArgs, cancel: CancellationToken) -> Result<UpscaleReport> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    let mut tracker = PerformanceTracker::new();

    let image = tracker.time("decode", || load_rgb(&args.input))?;
    let model = tracker.time("load model", || args.model.load())?;

    let device = args.tiles.device();
    let params = args
        .tiles
        .params_for(image.width(), image.height(), model.scale(), device.as_ref());
    let mut engine = TiledUpscaler::new(model, params)?.with_cancellation(cancel);

    info!(
        "Upscaling {} ({}x{}) by {}x",
        args.input.display(),
        image.width(),
        image.height(),
        engine.scale()
    );
    let outcome = tracker.time("upscale", || engine.upscale(&image))?;
    tracker
        .time("encode", || save_rgb(&outcome.image, &output))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        "Saved {} ({}x{})",
        output.display(),
        outcome.image.width(),
        outcome.image.height()
    );
    tracker.log_summary();
    print!("{}", tracker.summary());
    Ok(outcome.report)
}

fn print_report(report: &UpscaleReport) {
    if report.direct {
        println!("direct inference, {} fallback", report.tiles_fallback);
        return;
    }
    println!(
        "tiles: {} total, {} inferred, {} fallback, {} undersized in {} model calls",
        report.tiles_total,
        report.tiles_inferred,
        report.tiles_fallback,
        report.tiles_undersized,
        report.batches
    );
    println!(
        "per tile: avg {:.3}s, min {:.3}s, max {:.3}s ({:.2} tiles/s)",
        report.timings.average_secs(),
        report.timings.min_secs,
        report.timings.max_secs,
        report.timings.tiles_per_second()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ModelArgs, TileArgs};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn args(input: PathBuf, output: Option<PathBuf>) -> UpscaleArgs {
        UpscaleArgs {
            input,
            output,
            model: ModelArgs {
                model: "lanczos".to_string(),
                scale: Some(2),
                value_range: None,
                threads: None,
                models_dir: None,
            },
            tiles: TileArgs {
                tile: 64,
                overlap: 8,
                min_tile: 16,
                batch_size: 2,
                auto_tile: false,
                pad_to_tile: false,
            },
        }
    }

    #[tokio::test]
    async fn test_upscale_writes_default_output() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("small.png");
        RgbImage::from_fn(100, 70, |x, y| Rgb([x as u8, y as u8, 90]))
            .save(&input)
            .unwrap();

        run(args(input.clone(), None), CancellationToken::new())
            .await
            .unwrap();

        let written = image::open(temp.path().join("small_upscaled.png")).unwrap();
        assert_eq!((written.width(), written.height()), (200, 140));
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let temp = TempDir::new().unwrap();
        let result = run(
            args(temp.path().join("absent.png"), None),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }
}
