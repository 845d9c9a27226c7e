//! `tilescale models`: list registered and discovered model files.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tilescale_core::model::{discover_models, ModelRegistry, ResolvedModel};
use tilescale_core::{AppConfig, PathsConfig};

#[derive(Args, Debug, Clone)]
pub struct ModelsArgs {
    /// Models directory (defaults to $TILESCALE_MODELS_DIR or the config dir)
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ModelListing {
    #[serde(flatten)]
    model: ResolvedModel,
    registered: bool,
    available: bool,
    default: bool,
}

pub async fn run(args: ModelsArgs) -> Result<()> {
    let models_dir = args.models_dir.clone().unwrap_or_else(PathsConfig::models_dir);
    let listings = collect(&models_dir)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    println!("Models in {}", models_dir.display());
    if listings.is_empty() {
        println!("  (none; pass --model lanczos or a path to an .onnx file)");
        return Ok(());
    }
    for listing in &listings {
        let scale = listing
            .model
            .scale
            .map(|s| format!("x{s}"))
            .unwrap_or_else(|| "x?".to_string());
        let mut flags = Vec::new();
        if listing.default {
            flags.push("default");
        }
        if !listing.registered {
            flags.push("unregistered");
        }
        if !listing.available {
            flags.push("missing");
        }
        println!(
            "  {:<32} {:<4} {:<5} {}{}",
            listing.model.name,
            scale,
            listing.model.value_range.as_str(),
            listing.model.path.display(),
            if flags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", flags.join(", "))
            }
        );
    }
    Ok(())
}

fn collect(models_dir: &std::path::Path) -> Result<Vec<ModelListing>> {
    let registry = ModelRegistry::load_or_default(models_dir)?;
    let default_name = registry
        .default_model
        .clone()
        .unwrap_or_else(|| AppConfig::DEFAULT_MODEL.to_string());

    let mut listings: Vec<ModelListing> = registry
        .list(models_dir)
        .into_iter()
        .map(|model| ModelListing {
            available: model.path.is_file(),
            registered: true,
            default: model.name == default_name,
            model,
        })
        .collect();

    let known: BTreeSet<PathBuf> = listings.iter().map(|l| l.model.path.clone()).collect();
    listings.extend(
        discover_models(models_dir)
            .into_iter()
            .filter(|model| !known.contains(&model.path))
            .map(|model| ModelListing {
                registered: false,
                available: true,
                default: model.name == default_name,
                model,
            }),
    );
    Ok(listings)
}
