//! Tilescale - command-line super-resolution.
//!
//! Wraps `tilescale-core`: single-image and directory upscaling, tile plan
//! inspection, model listing and environment info.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tilescale_core::{CancellationToken, UpscaleError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use commands::{BatchArgs, InfoArgs, ModelsArgs, PlanArgs, UpscaleArgs};

#[derive(Parser, Debug)]
#[command(name = "tilescale")]
#[command(version, about = "Tiled super-resolution with ONNX models")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upscale a single image
    Upscale(UpscaleArgs),
    /// Upscale every image in a directory
    Batch(BatchArgs),
    /// Show the tile grid for an image without loading a model
    Plan(PlanArgs),
    /// List available models
    Models(ModelsArgs),
    /// Show directories, cache state and the detected device
    Info(InfoArgs),
}

fn init_logging(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print_suggestions(err: &anyhow::Error) {
    let exhausted = err
        .downcast_ref::<UpscaleError>()
        .map(UpscaleError::is_resource_exhaustion)
        .unwrap_or(false);
    if exhausted {
        eprintln!("Suggestions:");
        eprintln!("  - halve the tile size (--tile 256)");
        eprintln!("  - use --batch-size 1");
        eprintln!("  - use --auto-tile to size tiles from available memory");
        eprintln!("  - try a smaller scale model (x2 instead of x4)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.json_logs);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            interrupt.cancel();
        }
    });

    let result = match cli.command {
        Command::Upscale(args) => commands::upscale::run(args, cancel).await,
        Command::Batch(args) => commands::batch::run(args, cancel).await,
        Command::Plan(args) => commands::plan::run(args).await,
        Command::Models(args) => commands::models::run(args).await,
        Command::Info(args) => commands::info::run(args).await,
    };

    if let Err(e) = &result {
        print_suggestions(e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upscale_with_tile_flags() {
        let cli = Cli::try_parse_from([
            "tilescale",
            "--debug",
            "upscale",
            "in.png",
            "out.png",
            "--model",
            "lanczos",
            "--scale",
            "2",
            "--tile",
            "256",
            "--overlap",
            "32",
            "--batch-size",
            "4",
        ])
        .unwrap();

        assert!(cli.debug);
        match cli.command {
            Command::Upscale(args) => {
                assert_eq!(args.input.to_str(), Some("in.png"));
                assert_eq!(args.output.as_deref().and_then(|p| p.to_str()), Some("out.png"));
                assert_eq!(args.model.model, "lanczos");
                assert_eq!(args.model.scale, Some(2));
                assert_eq!(args.tiles.tile, 256);
                assert_eq!(args.tiles.overlap, 32);
                assert_eq!(args.tiles.batch_size, 4);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_upscale_defaults() {
        let cli = Cli::try_parse_from(["tilescale", "upscale", "in.png"]).unwrap();
        match cli.command {
            Command::Upscale(args) => {
                assert!(args.output.is_none());
                assert_eq!(args.model.model, tilescale_core::AppConfig::DEFAULT_MODEL);
                assert_eq!(args.tiles.tile, 512);
                assert_eq!(args.tiles.overlap, 64);
                assert_eq!(args.tiles.min_tile, 32);
                assert!(!args.tiles.auto_tile);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_batch_and_global_flag_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tilescale", "batch", "frames", "out", "--queue", "4", "--no-cache", "--json-logs",
        ])
        .unwrap();
        assert!(cli.json_logs);
        match cli.command {
            Command::Batch(args) => {
                assert_eq!(args.queue, 4);
                assert!(args.no_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_value_range_rejected() {
        let result = Cli::try_parse_from([
            "tilescale",
            "upscale",
            "in.png",
            "--value-range",
            "percent",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_scale_outside_supported_range_rejected() {
        for scale in ["0", "9", "100000000"] {
            let result = Cli::try_parse_from(["tilescale", "plan", "in.png", "--scale", scale]);
            assert!(result.is_err(), "scale {scale} accepted");
            let result = Cli::try_parse_from(["tilescale", "upscale", "in.png", "--scale", scale]);
            assert!(result.is_err(), "scale {scale} accepted");
        }
        assert!(Cli::try_parse_from(["tilescale", "plan", "in.png", "--scale", "8"]).is_ok());
    }

    #[test]
    fn test_missing_subcommand_rejected() {
        assert!(Cli::try_parse_from(["tilescale"]).is_err());
    }
}
