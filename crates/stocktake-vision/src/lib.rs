//! Tiled object detection plus perspective-aware residual estimation for
//! counting dense, overlapping objects in a single high-resolution photo.

pub mod bands;
pub mod calibrate;
pub mod color;
pub mod config;
pub mod detection;
pub mod error;
pub mod estimate;
pub mod geometry;
pub mod mask;
pub mod merge;
pub mod pipeline;
pub mod postprocess;
pub mod remap;
pub mod residual;
pub mod roi;
pub mod suppress;
pub mod tiling;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;

pub use bands::{Band, CalibrationSource};
pub use config::{DetectorConfig, EngineConfig, OvercountBias};
pub use detection::{Detection, RawDetection};
pub use error::{ConfigError, EngineError, EngineResult};
pub use mask::BinaryMask;
pub use pipeline::{Pipeline, PipelineResult, RunStats, Stage, TileFailure};
pub use roi::{StaticMask, WholeImage};

/// Object detector run on one tile at a time.
///
/// Coordinates are tile-local pixels. Implementations are shared across the
/// worker pool, so `predict` takes `&self`.
pub trait Detector: Send + Sync {
    fn predict(&self, tile: &RgbImage) -> Result<Vec<RawDetection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// Supplies the area of the image that holds countable objects.
/// `None` means the whole image.
pub trait RegionOfInterest: Send + Sync {
    fn mask_for(&self, image: &RgbImage) -> Option<BinaryMask>;
}
