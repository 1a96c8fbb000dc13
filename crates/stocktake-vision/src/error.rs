use thiserror::Error;

use crate::pipeline::Stage;

/// Invalid tunables. Raised while loading configuration, never per image.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tile_size must be positive")]
    TileSize,

    #[error("overlap_ratio must be in [0, 1), got {0}")]
    OverlapRatio(f32),

    #[error("match_threshold must be in [0, 1], got {0}")]
    MatchThreshold(f32),

    #[error("band_count must be >= 1")]
    BandCount,

    #[error("background_skip_fraction must be in [0, 1], got {0}")]
    SkipFraction(f32),

    #[error("overcount_bias must be finite and > 0, got {0}")]
    OvercountBias(f64),

    #[error("min_calibration_samples must be >= 1")]
    CalibrationSamples,

    #[error("fallback_object_area_px must be finite and > 0, got {0}")]
    FallbackArea(f64),

    #[error("footprint_scale must be in (0, 1], got {0}")]
    FootprintScale(f32),

    #[error("footprint_blur_sigma must be finite and >= 0, got {0}")]
    BlurSigma(f32),

    #[error("foliage_excess_green must be finite, got {0}")]
    FoliageExcessGreen(f32),

    #[error("workers must be >= 1 when set")]
    Workers,

    #[error("{name} range invalid: {reason}")]
    HsvRange { name: &'static str, reason: String },
}

/// Failures that abort a pipeline run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("image decode failed: {0}")]
    ImageDecode(String),

    #[error("detector failed on all {attempted} attempted tiles (last error: {last})")]
    Detector { attempted: usize, last: String },

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stage the run was in when it failed. `None` when no run was started.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::Config(_) | EngineError::WorkerPool(_) => None,
            EngineError::ImageDecode(_) => Some(Stage::Planned),
            EngineError::Detector { .. } => Some(Stage::Detecting),
        }
    }
}
