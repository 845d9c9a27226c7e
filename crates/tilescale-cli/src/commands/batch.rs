//! `tilescale batch`: upscale a directory through a bounded pipeline.
//!
//! Three stages connected by bounded channels: decode on the blocking pool,
//! inference on one blocking task that owns the model, encode on the
//! blocking pool. A full channel stalls the stage before it, so at most
//! `queue` decoded images wait for the model.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use image::RgbImage;
use tilescale_core::raster::{load_rgb, save_rgb};
use tilescale_core::{
    CachedUpscale, CancellationToken, PathsConfig, ResultCache, TiledUpscaler, UpscaleError,
    UpscaleModel,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{ModelArgs, TileArgs};

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Directory of input images
    pub input_dir: PathBuf,

    /// Directory for upscaled images (same file names)
    pub output_dir: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub tiles: TileArgs,

    /// Decoded images allowed to wait for the model
    #[arg(long, default_value_t = 2)]
    pub queue: usize,

    /// Process every input even if a cached result is still valid
    #[arg(long)]
    pub no_cache: bool,

    /// Result cache directory (defaults to $TILESCALE_CACHE/upscale)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// One input moving through the pipeline.
struct Job {
    input: PathBuf,
    output: PathBuf,
}

struct Decoded {
    job: Job,
    image: RgbImage,
}

struct Upscaled {
    job: Job,
    image: RgbImage,
}

/// Final state of one input.
#[derive(Debug)]
pub struct JobResult {
    pub input: PathBuf,
    pub output: PathBuf,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub found: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub async fn run(args: BatchArgs, cancel: CancellationToken) -> Result<()> {
    let summary = run_batch(&args, cancel).await?;
    println!(
        "{} images: {} upscaled, {} skipped (cached), {} failed",
        summary.found, summary.succeeded, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        bail!("{} of {} images failed", summary.failed, summary.found);
    }
    Ok(())
}

pub async fn run_batch(args: &BatchArgs, cancel: CancellationToken) -> Result<BatchSummary> {
    if list_images(&args.input_dir)?.is_empty() {
        warn!("No images found in {}", args.input_dir.display());
        return Ok(BatchSummary::default());
    }
    let model_args = args.model.clone();
    let model = tokio::task::spawn_blocking(move || model_args.load())
        .await
        .context("Model loading task panicked")??;
    run_batch_with(args, model, cancel).await
}

/// Run the batch with an already loaded model.
///
/// Finished outputs are recorded in the cache even when the run is
/// interrupted; the interruption is returned after the cache is saved.
async fn run_batch_with(
    args: &BatchArgs,
    model: Box<dyn UpscaleModel>,
    cancel: CancellationToken,
) -> Result<BatchSummary> {
    let started = Instant::now();
    let inputs = list_images(&args.input_dir)?;
    let mut summary = BatchSummary {
        found: inputs.len(),
        ..Default::default()
    };
    let (model_name, scale) = (model.name().to_string(), model.scale());

    let mut cache = if args.no_cache {
        None
    } else {
        let dir = args
            .cache_dir
            .clone()
            .unwrap_or_else(|| PathsConfig::cache_root().join(PathsConfig::RESULT_CACHE_NAME));
        Some(ResultCache::open(dir)?)
    };

    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = output_path(&input, &args.output_dir);
        if let Some(cache) = cache.as_mut() {
            if cache.is_fresh(&input, &model_name, scale) && output.exists() {
                debug!("Skipping {} (cached)", input.display());
                summary.skipped += 1;
                continue;
            }
        }
        jobs.push(Job { input, output });
    }
    info!(
        "Processing {} images ({} cached) with {} at {}x",
        jobs.len(),
        summary.skipped,
        model_name,
        scale
    );

    let PipelineRun { results, stopped } =
        run_pipeline(jobs, model, &args.tiles, args.queue, cancel).await?;

    for result in &results {
        match &result.error {
            None => {
                summary.succeeded += 1;
                if let Some(cache) = cache.as_mut() {
                    let entry = CachedUpscale::new(&result.output, &model_name, scale);
                    if let Err(e) = cache.insert(&result.input, entry) {
                        warn!("Could not cache {}: {}", result.input.display(), e);
                    }
                }
            }
            Some(message) => {
                summary.failed += 1;
                error!("{}: {}", result.input.display(), message);
            }
        }
    }
    if let Some(cache) = cache.as_mut() {
        cache.save()?;
    }
    if let Some(e) = stopped {
        warn!(
            "Batch stopped after {} of {} images",
            summary.succeeded + summary.failed,
            summary.found - summary.skipped
        );
        return Err(e);
    }

    info!(
        "Batch finished in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    Ok(summary)
}

/// Results of the pipeline, plus the error that stopped inference early.
struct PipelineRun {
    results: Vec<JobResult>,
    stopped: Option<anyhow::Error>,
}

async fn run_pipeline(
    jobs: Vec<Job>,
    model: Box<dyn UpscaleModel>,
    tiles: &TileArgs,
    queue: usize,
    cancel: CancellationToken,
) -> Result<PipelineRun> {
    let queue = queue.max(1);
    let total = jobs.len();
    let (decoded_tx, mut decoded_rx) = mpsc::channel::<Decoded>(queue);
    let (upscaled_tx, mut upscaled_rx) = mpsc::channel::<Upscaled>(queue);
    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<JobResult>();

    // Decode
    let decode_failed = failed_tx.clone();
    let decode_cancel = cancel.clone();
    let decoder = tokio::spawn(async move {
        for job in jobs {
            if decode_cancel.is_cancelled() {
                break;
            }
            let input = job.input.clone();
            let decoded = tokio::task::spawn_blocking(move || load_rgb(&input)).await;
            match decoded {
                Ok(Ok(image)) => {
                    if decoded_tx.send(Decoded { job, image }).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    let _ = decode_failed.send(failed(job, e.to_string()));
                }
                Err(e) => {
                    let _ = decode_failed.send(failed(job, format!("decode task panicked: {e}")));
                }
            }
        }
    });

    // Inference
    let tile_args = tiles.clone();
    let infer_failed = failed_tx.clone();
    let inference = tokio::task::spawn_blocking(move || -> Result<()> {
        let device = tile_args.device();
        let scale = model.scale();
        let mut engine = TiledUpscaler::new(model, tile_args.params_for(1, 1, scale, None))?
            .with_cancellation(cancel);

        let mut done = 0;
        while let Some(Decoded { job, image }) = decoded_rx.blocking_recv() {
            if tile_args.auto_tile {
                let params =
                    tile_args.params_for(image.width(), image.height(), scale, device.as_ref());
                engine.set_params(params)?;
            }
            done += 1;
            info!("[{}/{}] {}", done, total, job.input.display());
            match engine.upscale(&image) {
                Ok(outcome) => {
                    let upscaled = Upscaled {
                        job,
                        image: outcome.image,
                    };
                    if upscaled_tx.blocking_send(upscaled).is_err() {
                        break;
                    }
                }
                Err(UpscaleError::Cancelled) => return Err(UpscaleError::Cancelled.into()),
                Err(e) => {
                    let _ = infer_failed.send(failed(job, e.to_string()));
                }
            }
        }
        Ok(())
    });

    // Encode
    let write_failed = failed_tx;
    let writer = tokio::spawn(async move {
        let mut written = Vec::new();
        while let Some(Upscaled { job, image }) = upscaled_rx.recv().await {
            let output = job.output.clone();
            let saved = tokio::task::spawn_blocking(move || save_rgb(&image, &output)).await;
            match saved {
                Ok(Ok(())) => written.push(JobResult {
                    input: job.input,
                    output: job.output,
                    error: None,
                }),
                Ok(Err(e)) => {
                    let _ = write_failed.send(failed(job, e.to_string()));
                }
                Err(e) => {
                    let _ = write_failed.send(failed(job, format!("encode task panicked: {e}")));
                }
            }
        }
        written
    });

    decoder.await.context("Decode stage panicked")?;
    let inference_result = inference.await.context("Inference stage panicked")?;
    let mut results = writer.await.context("Encode stage panicked")?;

    while let Ok(result) = failed_rx.try_recv() {
        results.push(result);
    }
    results.sort_by(|a, b| a.input.cmp(&b.input));
    Ok(PipelineRun {
        results,
        stopped: inference_result.err(),
    })
}

fn failed(job: Job, message: String) -> JobResult {
    JobResult {
        input: job.input,
        output: job.output,
        error: Some(message),
    }
}

/// Supported images directly inside `dir`, sorted by path.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Input directory not found: {}", dir.display());
    }
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| PathsConfig::is_image_path(p))
        .collect();
    images.sort();
    Ok(images)
}

fn output_path(input: &Path, output_dir: &Path) -> PathBuf {
    match input.file_name() {
        Some(name) => output_dir.join(name),
        None => output_dir.join("output.png"),
    }
}
