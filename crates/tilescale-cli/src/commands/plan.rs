//! `tilescale plan`: print the tile grid for an image without running a model.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tilescale_core::raster::{image_dimensions, output_bytes};
use tilescale_core::{EngineLimits, TilePlan, TileParams};

use super::{TileArgs, FALLBACK_SCALE};

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Image to plan for (only the header is read)
    pub input: PathBuf,

    #[command(flatten)]
    pub tiles: TileArgs,

    /// Upscale factor
    #[arg(
        short,
        long,
        default_value_t = FALLBACK_SCALE,
        value_parser = clap::value_parser!(u32).range(1..=EngineLimits::MAX_SCALE as i64)
    )]
    pub scale: u32,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    params: TileParams,
    output_width: u32,
    output_height: u32,
    output_bytes: u64,
    model_tiles: usize,
    resized_tiles: usize,
    plan: TilePlan,
}

pub async fn run(args: PlanArgs) -> Result<()> {
    let report = build_report(&args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn build_report(args: &PlanArgs) -> Result<PlanReport> {
    let (width, height) = image_dimensions(&args.input)?;
    let device = args.tiles.device();
    let params = args
        .tiles
        .params_for(width, height, args.scale, device.as_ref());
    let plan = TilePlan::new(width, height, args.scale, &params)?;

    let resized_tiles = if plan.direct {
        0
    } else {
        plan.undersized(params.min_tile).count()
    };
    let (output_width, output_height) = plan.output_dimensions();

    Ok(PlanReport {
        output_width,
        output_height,
        output_bytes: output_bytes(width, height, args.scale),
        model_tiles: plan.len() - resized_tiles,
        resized_tiles,
        params,
        plan,
    })
}

fn print_report(report: &PlanReport) {
    let plan = &report.plan;
    println!(
        "{}x{} -> {}x{} ({:.1} MiB)",
        plan.width,
        plan.height,
        report.output_width,
        report.output_height,
        report.output_bytes as f64 / (1024.0 * 1024.0)
    );
    if plan.direct {
        println!("fits one tile: direct inference");
        return;
    }
    println!(
        "tile {} overlap {} stride {} batch {}: {} columns x {} rows",
        report.params.tile_size,
        report.params.overlap,
        plan.stride,
        report.params.batch_size,
        plan.columns,
        plan.rows
    );
    for tile in &plan.tiles {
        let route = if tile.is_viable(report.params.min_tile) {
            "model"
        } else {
            "resize"
        };
        println!(
            "  #{:<4} r{} c{}  {:>5},{:<5} {:>4}x{:<4} {}",
            tile.index, tile.row, tile.column, tile.x, tile.y, tile.width, tile.height, route
        );
    }
    println!(
        "{} model tiles, {} resized",
        report.model_tiles, report.resized_tiles
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn plan_args(input: PathBuf, tile: u32, overlap: u32, min_tile: u32) -> PlanArgs {
        PlanArgs {
            input,
            tiles: TileArgs {
                tile,
                overlap,
                min_tile,
                batch_size: 1,
                auto_tile: false,
                pad_to_tile: false,
            },
            scale: 4,
            json: true,
        }
    }

    #[test]
    fn test_plan_reference_grid() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("wide.png");
        RgbImage::new(2000, 1500).save(&input).unwrap();

        let report = build_report(&plan_args(input, 512, 64, 32)).unwrap();
        assert_eq!((report.plan.columns, report.plan.rows), (5, 4));
        assert_eq!(report.plan.len(), 20);
        assert_eq!((report.output_width, report.output_height), (8000, 6000));
        assert_eq!(report.output_bytes, 8000 * 6000 * 3);
    }

    #[test]
    fn test_plan_counts_resized_edges() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("edge.png");
        RgbImage::new(130, 100).save(&input).unwrap();

        let report = build_report(&plan_args(input, 64, 4, 16)).unwrap();
        assert!(!report.plan.direct);
        assert!(report.resized_tiles > 0);
        assert_eq!(
            report.model_tiles + report.resized_tiles,
            report.plan.len()
        );
    }

    #[test]
    fn test_small_image_is_direct() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("small.png");
        RgbImage::new(100, 80).save(&input).unwrap();

        let report = build_report(&plan_args(input, 512, 64, 32)).unwrap();
        assert!(report.plan.direct);
        assert_eq!(report.resized_tiles, 0);
        assert_eq!(report.model_tiles, 1);
    }

    #[test]
    fn test_plan_json_serializes() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("small.png");
        RgbImage::new(600, 300).save(&input).unwrap();

        let report = build_report(&plan_args(input, 256, 32, 32)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["plan"]["columns"], 3);
        assert_eq!(json["output_width"], 2400);
    }

    #[test]
    fn test_out_of_range_scale_is_an_error() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("small.png");
        RgbImage::new(100, 80).save(&input).unwrap();

        let mut args = plan_args(input, 64, 8, 16);
        args.scale = 100_000_000;
        assert!(build_report(&args).is_err());
    }
}
