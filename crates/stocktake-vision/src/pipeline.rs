use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bands::{Band, BandPartitioner};
use crate::calibrate::PerBandCalibrator;
use crate::config::EngineConfig;
use crate::detection::{Detection, RawDetection};
use crate::error::{EngineError, EngineResult};
use crate::estimate::CountEstimator;
use crate::merge::CrossTileMerger;
use crate::remap::{remap, retain_valid};
use crate::residual::ResidualMaskBuilder;
use crate::roi::WholeImage;
use crate::suppress::BackgroundSuppressor;
use crate::tiling::{BackgroundTileFilter, TilePlan, TilePlanner, TileRect};
use crate::{Detector, RegionOfInterest};

/// Per-image run state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planned,
    Detecting,
    Merging,
    Estimating,
    Done,
    Failed,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Planned => Some(Stage::Detecting),
            Stage::Detecting => Some(Stage::Merging),
            Stage::Merging => Some(Stage::Estimating),
            Stage::Estimating => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct StageTracker {
    history: Vec<Stage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self { history: vec![Stage::Planned] }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Planned)
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Moves to the next stage in sequence.
    pub fn advance(&mut self) -> Stage {
        let from = self.current();
        match from.next() {
            Some(to) => {
                debug!("pipeline: {:?} -> {:?}", from, to);
                self.history.push(to);
                to
            }
            None => {
                debug_assert!(false, "advance from terminal stage {:?}", from);
                from
            }
        }
    }

    pub fn fail(&mut self, err: &EngineError) {
        let from = self.current();
        debug_assert!(!from.is_terminal(), "fail from terminal stage {:?}", from);
        debug_assert!(err.stage().map_or(true, |s| s == from), "{:?} raised during {:?}", err, from);
        debug!("pipeline: {:?} -> Failed: {}", from, err);
        self.history.push(Stage::Failed);
    }
}

/// A tile whose inference failed twice and contributed no detections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileFailure {
    pub tile_index: usize,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub image_width: u32,
    pub image_height: u32,
    pub tiles_planned: usize,
    pub tiles_skipped: usize,
    pub tiles_inferred: usize,
    pub tiles_retried: usize,
    pub tiles_failed: usize,
    pub raw_detections: usize,
    pub rejected_detections: usize,
    pub merged_detections: usize,
    pub detect_ms: u64,
    pub merge_ms: u64,
    pub estimate_ms: u64,
    pub total_ms: u64,
}

/// Everything one run produces. Handed to persistence as-is.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub detections: Vec<Detection>,
    pub estimations: Vec<Band>,
    /// Some tiles failed inference; the counts may be low.
    pub degraded: bool,
    pub tile_failures: Vec<TileFailure>,
    /// Stages the run passed through, ending in `Done`.
    pub stages: Vec<Stage>,
    pub stats: RunStats,
}

impl PipelineResult {
    pub fn estimated_total(&self) -> u64 {
        self.estimations.iter().map(|b| b.estimated_count).sum()
    }

    /// Detected plus estimated undetected objects.
    pub fn total_count(&self) -> u64 {
        self.detections.len() as u64 + self.estimated_total()
    }
}

enum TileOutcome {
    Skipped,
    Detected { dets: Vec<Detection>, attempts: u32 },
    Failed(TileFailure),
}

/// Tiled detection followed by banded residual estimation for one image at a time.
///
/// Cheap to share: the detector is reference-counted and read-only, and each
/// run owns its tiles, masks and bands.
pub struct Pipeline {
    cfg: EngineConfig,
    detector: Arc<dyn Detector>,
    roi: Arc<dyn RegionOfInterest>,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(cfg: EngineConfig, detector: Arc<dyn Detector>) -> EngineResult<Self> {
        cfg.validate()?;
        let workers = cfg.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("stocktake-worker-{}", i))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        info!(
            "pipeline: detector={} workers={} tile={} overlap={} bands={} alpha={}",
            detector.name(),
            workers,
            cfg.tile_size,
            cfg.overlap_ratio,
            cfg.band_count,
            cfg.overcount_bias.get()
        );
        Ok(Self { cfg, detector, roi: Arc::new(WholeImage), pool })
    }

    pub fn with_roi(mut self, roi: Arc<dyn RegionOfInterest>) -> Self {
        self.roi = roi;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn run_bytes(&self, bytes: &[u8]) -> EngineResult<PipelineResult> {
        let img = image::load_from_memory(bytes).map_err(|e| {
            debug!("pipeline: decode failed: {}", e);
            EngineError::ImageDecode(e.to_string())
        })?;
        self.run_image(&img.to_rgb8())
    }

    pub fn run_image(&self, image: &RgbImage) -> EngineResult<PipelineResult> {
        let started = Instant::now();
        let mut stage = StageTracker::new();
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            let err = EngineError::ImageDecode(format!("empty image {}x{}", w, h));
            stage.fail(&err);
            return Err(err);
        }

        let plan = TilePlanner::from_config(&self.cfg).plan(w, h);
        debug!("tiling: {}x{} -> {} tiles (tiling_needed={})", w, h, plan.tiles.len(), plan.tiling_needed);
        let mut stats = RunStats { image_width: w, image_height: h, tiles_planned: plan.tiles.len(), ..Default::default() };

        stage.advance();
        let t = Instant::now();
        let mut raw = Vec::new();
        let mut failures = Vec::new();
        for outcome in self.detect_tiles(image, &plan) {
            match outcome {
                TileOutcome::Skipped => stats.tiles_skipped += 1,
                TileOutcome::Detected { dets, attempts } => {
                    stats.tiles_inferred += 1;
                    if attempts > 1 { stats.tiles_retried += 1; }
                    raw.extend(dets);
                }
                TileOutcome::Failed(f) => {
                    stats.tiles_inferred += 1;
                    stats.tiles_retried += 1;
                    failures.push(f);
                }
            }
        }
        stats.tiles_failed = failures.len();
        stats.detect_ms = elapsed_ms(t);

        if stats.tiles_inferred > 0 && stats.tiles_failed == stats.tiles_inferred {
            let last = failures.last().map(|f| f.error.clone()).unwrap_or_default();
            let err = EngineError::Detector { attempted: stats.tiles_inferred, last };
            stage.fail(&err);
            return Err(err);
        }

        stats.raw_detections = raw.len();
        stats.rejected_detections = retain_valid(&mut raw, w, h);
        if stats.rejected_detections > 0 {
            debug!("detect: dropped {} detections outside the image or with invalid size/confidence", stats.rejected_detections);
        }

        stage.advance();
        let t = Instant::now();
        let detections = if plan.tiling_needed {
            CrossTileMerger::new(self.cfg.match_threshold, self.cfg.tile_size as f32).merge(raw)
        } else {
            raw
        };
        stats.merged_detections = detections.len();
        stats.merge_ms = elapsed_ms(t);

        stage.advance();
        let t = Instant::now();
        let estimations = self.estimate(image, &detections);
        stats.estimate_ms = elapsed_ms(t);

        stage.advance();
        stats.total_ms = elapsed_ms(started);

        let result = PipelineResult {
            detections,
            estimations,
            degraded: !failures.is_empty(),
            tile_failures: failures,
            stages: stage.history().to_vec(),
            stats,
        };
        info!(
            "pipeline: {}x{} tiles={} skipped={} failed={} detected={} estimated={} total={} ({}ms)",
            w,
            h,
            result.stats.tiles_planned,
            result.stats.tiles_skipped,
            result.stats.tiles_failed,
            result.detections.len(),
            result.estimated_total(),
            result.total_count(),
            result.stats.total_ms
        );
        if result.degraded {
            warn!("pipeline: degraded run, {} tiles contributed no detections", result.tile_failures.len());
        }
        Ok(result)
    }

    // Fan-out over tiles; the collected vector is the merge barrier.
    fn detect_tiles(&self, image: &RgbImage, plan: &TilePlan) -> Vec<TileOutcome> {
        let filter = BackgroundTileFilter::from_config(&self.cfg);
        let filter = plan.tiling_needed.then_some(&filter);
        self.pool.install(|| {
            plan.tiles
                .par_iter()
                .map(|tile| self.process_tile(image, tile, filter))
                .collect()
        })
    }

    fn process_tile(&self, image: &RgbImage, tile: &TileRect, filter: Option<&BackgroundTileFilter>) -> TileOutcome {
        if let Some(f) = filter {
            if f.should_skip(image, tile) {
                debug!("tiling: skip tile {} ({},{}) as background", tile.index, tile.row, tile.col);
                return TileOutcome::Skipped;
            }
        }

        let whole = tile.x0 == 0 && tile.y0 == 0 && tile.x1 == image.width() && tile.y1 == image.height();
        let pixels: Cow<'_, RgbImage> = if whole {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(imageops::crop_imm(image, tile.x0, tile.y0, tile.width(), tile.height()).to_image())
        };

        match self.predict_with_retry(&pixels, tile.index) {
            Ok((raw, attempts)) => TileOutcome::Detected { dets: remap(raw, tile), attempts },
            Err((e, attempts)) => TileOutcome::Failed(TileFailure { tile_index: tile.index, attempts, error: format!("{:#}", e) }),
        }
    }

    fn predict_with_retry(&self, pixels: &RgbImage, index: usize) -> Result<(Vec<RawDetection>, u32), (anyhow::Error, u32)> {
        match self.detector.predict(pixels) {
            Ok(dets) => Ok((dets, 1)),
            Err(e) => {
                warn!("detect: tile {} failed, retrying in {}ms: {:#}", index, self.cfg.retry_backoff_ms, e);
                std::thread::sleep(Duration::from_millis(self.cfg.retry_backoff_ms));
                self.detector.predict(pixels).map(|dets| (dets, 2)).map_err(|e| {
                    warn!("detect: tile {} failed after retry, treating as empty: {:#}", index, e);
                    (e, 2)
                })
            }
        }
    }

    fn estimate(&self, image: &RgbImage, detections: &[Detection]) -> Vec<Band> {
        let (w, h) = image.dimensions();
        let roi = self.roi.mask_for(image).map(|m| {
            if m.width() != w || m.height() != h {
                debug!("estimate: resampling roi {}x{} to {}x{}", m.width(), m.height(), w, h);
                m.resized(w, h)
            } else {
                m
            }
        });

        let residual = ResidualMaskBuilder::from_config(&self.cfg).build(roi.as_ref(), w, h, detections);
        let mut bands = BandPartitioner::new(self.cfg.band_count).partition(&residual);

        let suppressor = BackgroundSuppressor::from_config(&self.cfg);
        let calibrator = PerBandCalibrator::from_config(&self.cfg);
        let estimator = CountEstimator::new(self.cfg.overcount_bias);
        self.pool.install(|| {
            bands.par_iter_mut().for_each(|band| {
                suppressor.suppress(image, &residual, band);
                calibrator.calibrate(band, detections);
                estimator.estimate(band);
            })
        });

        for b in &bands {
            debug!(
                "estimate: band {} y={}..{} residual={} kept={} area={:.1} ({:?}, n={}) -> {}",
                b.band_index,
                b.y_start,
                b.y_end,
                b.residual_area_px,
                b.suppressed_area_px,
                b.calibrated_object_area_px,
                b.calibration_source,
                b.calibration_samples,
                b.estimated_count
            );
        }
        bands
    }
}

fn elapsed_ms(t: Instant) -> u64 {
    t.elapsed().as_millis() as u64
}
