//! `tilescale info`: directories, result cache state and the detected device.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tilescale_core::{
    CacheInfo, CacheStats, DeviceProfile, EngineLimits, PathsConfig, ResultCache, TileDefaults,
};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Delete every cached result before reporting
    #[arg(long)]
    pub clear_cache: bool,

    /// Result cache directory (defaults to $TILESCALE_CACHE/upscale)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct InfoReport {
    version: &'static str,
    models_dir: PathBuf,
    cache: CacheInfo,
    cache_stats: CacheStats,
    device: DeviceProfile,
    default_tile_size: u32,
    default_overlap: u32,
    max_scale: u32,
    max_output_bytes: u64,
}

pub async fn run(args: InfoArgs) -> Result<()> {
    let json = args.json;
    let report = tokio::task::spawn_blocking(move || gather(&args))
        .await
        .context("Info task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn gather(args: &InfoArgs) -> Result<InfoReport> {
    let cache_dir = args
        .cache_dir
        .clone()
        .unwrap_or_else(|| PathsConfig::cache_root().join(PathsConfig::RESULT_CACHE_NAME));
    let mut cache = ResultCache::open(cache_dir)?;
    if args.clear_cache {
        let removed = cache.len();
        cache.clear()?;
        info!("Cleared {} cached results", removed);
    }

    let report = InfoReport {
        version: env!("CARGO_PKG_VERSION"),
        models_dir: PathsConfig::models_dir(),
        cache: cache.info(),
        cache_stats: cache.stats(),
        device: DeviceProfile::detect(),
        default_tile_size: TileDefaults::TILE_SIZE,
        default_overlap: TileDefaults::OVERLAP,
        max_scale: EngineLimits::MAX_SCALE,
        max_output_bytes: EngineLimits::MAX_OUTPUT_BYTES,
    };
    Ok(report)
}

fn print_report(report: &InfoReport) {
    println!("tilescale {}", report.version);
    println!("models dir:  {}", report.models_dir.display());
    println!("cache file:  {}", report.cache.cache_file.display());
    println!(
        "cache:       {} entries, {} stale, {} missing outputs ({} bytes)",
        report.cache_stats.total_entries,
        report.cache_stats.stale_entries,
        report.cache_stats.missing_outputs,
        report.cache.size_bytes
    );
    println!(
        "device:      {}{} with {:.1} GiB, {} CPUs",
        report.device.kind,
        report
            .device
            .name
            .as_ref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default(),
        report.device.memory_gib(),
        report.device.cpu_count
    );
    println!(
        "defaults:    tile {} overlap {}, scale up to {}x, output up to {:.1} GiB",
        report.default_tile_size,
        report.default_overlap,
        report.max_scale,
        report.max_output_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    );
}
