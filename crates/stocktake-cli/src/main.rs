mod config;
mod report;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use stocktake_vision::tiling::TilePlanner;
use stocktake_vision::{Detector, Pipeline, StaticMask};

use crate::config::{load_config, Config};
use crate::report::build_report;

#[cfg(feature = "vision-tflite")]
use stocktake_vision::tflite::TfliteDetector;

#[derive(Debug, Parser)]
#[command(name = "stocktake", version, about = "Stocktake - plant counting from bench photos")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config and check that referenced files exist.
    Doctor,
    /// Count objects in one image and emit a JSON report.
    Count(CountArgs),
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, clap::Args)]
struct CountArgs {
    #[arg(long)]
    image: PathBuf,
    /// Overrides `[roi].mask_path`.
    #[arg(long)]
    roi_mask: Option<PathBuf>,
    #[arg(long)]
    run_id: Option<String>,
    /// Overrides `[count].timeout_s`.
    #[arg(long)]
    timeout_s: Option<u64>,
    /// Report file; defaults to `[count].report_dir/<run_id>.json`, else stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    block_on_detached(async move {
        match cli.cmd {
            Command::Doctor => doctor(&cfg).await,
            Command::Count(args) => count(&cfg, args).await,
            Command::Vision { cmd } => vision_cmd(&cfg, cmd).await,
        }
    })?
}

/// Runs `fut` on a fresh runtime. Blocking tasks still running when `fut`
/// resolves (a timed-out engine run) are abandoned, not joined.
fn block_on_detached<F: Future>(fut: F) -> Result<F::Output> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let out = rt.block_on(fut);
    rt.shutdown_background();
    Ok(out)
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let e = &cfg.engine;
    let planner = TilePlanner::from_config(e);
    info!(
        "doctor: engine OK (tile={} overlap={}px stride={}px bands={} alpha={} workers={})",
        e.tile_size,
        planner.overlap_px(),
        planner.stride(),
        e.band_count,
        e.overcount_bias.get(),
        e.worker_count()
    );

    let d = &cfg.detector;
    anyhow::ensure!(d.backend == "tflite", "unknown detector.backend: {}", d.backend);
    anyhow::ensure!(!d.class_names.is_empty(), "detector.class_names is empty");
    anyhow::ensure!(d.img_w > 0 && d.img_h > 0, "detector.img_w/img_h must be positive");
    anyhow::ensure!((0.0..=1.0).contains(&d.conf_threshold), "detector.conf_threshold must be in [0, 1]");
    let model = d.active_model_path();
    if Path::new(model).is_file() {
        info!("doctor: model {} present", model);
    } else {
        warn!("doctor: model {} not found", model);
    }
    if cfg!(not(feature = "vision-tflite")) {
        warn!("doctor: binary built without --features vision-tflite; `count` has no detector");
    }

    if let Some(roi) = &cfg.roi {
        StaticMask::load(&roi.mask_path).context("roi.mask_path")?;
        info!("doctor: roi mask {} OK", roi.mask_path);
    }

    if let Some(dir) = &cfg.count.report_dir {
        anyhow::ensure!(Path::new(dir).is_dir(), "count.report_dir {} is not a directory", dir);
    }

    info!("doctor: OK");
    Ok(())
}

async fn count(cfg: &Config, args: CountArgs) -> Result<()> {
    let bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("read image {}", args.image.display()))?;

    let mut pipeline = Pipeline::new(cfg.engine.clone(), init_detector(cfg)?)?;
    let roi_path = args.roi_mask.clone().or_else(|| cfg.roi.as_ref().map(|r| PathBuf::from(&r.mask_path)));
    if let Some(p) = roi_path {
        pipeline = pipeline.with_roi(Arc::new(StaticMask::load(&p)?));
        info!("count: roi mask {}", p.display());
    }

    let ts_unix_ms = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let run_id = args.run_id.clone().unwrap_or_else(|| format!("run-{}", ts_unix_ms));
    info!("count: run {} on {} ({} bytes)", run_id, args.image.display(), bytes.len());

    // The engine is CPU bound; keep it off the async workers.
    let task = tokio::task::spawn_blocking(move || pipeline.run_bytes(&bytes));
    let joined = match args.timeout_s.or(cfg.count.timeout_s) {
        Some(s) => tokio::time::timeout(Duration::from_secs(s), task)
            .await
            .map_err(|_| anyhow!("count: run {} timed out after {}s", run_id, s))?,
        None => task.await,
    };
    let res = joined.context("pipeline task panicked")??;

    let report = build_report(&run_id, ts_unix_ms, &res);
    println!(
        "run={} detected={} estimated={} total={} degraded={}",
        run_id, report.summary.detected_count, report.summary.estimated_count, report.summary.total_count, report.summary.degraded
    );

    let json = serde_json::to_string_pretty(&report)?;
    let out = args
        .out
        .clone()
        .or_else(|| cfg.count.report_dir.as_ref().map(|d| Path::new(d).join(format!("{}.json", run_id))));
    match out {
        Some(path) => {
            tokio::fs::write(&path, json).await.with_context(|| format!("write report {}", path.display()))?;
            info!("count: report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => inspect(cfg),
    }
}

#[cfg(feature = "vision-tflite")]
fn inspect(cfg: &Config) -> Result<()> {
    let d = TfliteDetector::new(cfg.detector.clone())?;
    print!("{}", d.inspect()?);
    Ok(())
}

#[cfg(not(feature = "vision-tflite"))]
fn inspect(_cfg: &Config) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite");
}

#[cfg(feature = "vision-tflite")]
fn init_detector(cfg: &Config) -> Result<Arc<dyn Detector>> {
    match cfg.detector.backend.as_str() {
        "tflite" => Ok(Arc::new(TfliteDetector::new(cfg.detector.clone())?)),
        other => anyhow::bail!("unknown detector.backend: {}", other),
    }
}

#[cfg(not(feature = "vision-tflite"))]
fn init_detector(cfg: &Config) -> Result<Arc<dyn Detector>> {
    anyhow::bail!("detector.backend={} but binary not built with --features vision-tflite", cfg.detector.backend);
}
