use serde::{Deserialize, Serialize};

use crate::color::HsvRange;
use crate::error::ConfigError;

/// Divisor bias applied to the calibrated object area. Values below 1.0
/// lean the estimate towards overcounting.
///
/// Deserializes through [`TryFrom<f64>`], so a non-positive bias is rejected
/// while the configuration is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct OvercountBias(f64);

impl OvercountBias {
    pub fn new(alpha: f64) -> Result<Self, ConfigError> {
        if alpha.is_finite() && alpha > 0.0 {
            Ok(Self(alpha))
        } else {
            Err(ConfigError::OvercountBias(alpha))
        }
    }

    pub fn get(self) -> f64 { self.0 }
}

impl Default for OvercountBias {
    fn default() -> Self { Self(0.9) }
}

impl TryFrom<f64> for OvercountBias {
    type Error = ConfigError;
    fn try_from(v: f64) -> Result<Self, Self::Error> { Self::new(v) }
}

impl From<OvercountBias> for f64 {
    fn from(b: OvercountBias) -> f64 { b.0 }
}

/// Engine tunables. Loaded once per deployment and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Square tile edge in pixels.
    pub tile_size: u32,
    /// Fraction of `tile_size` shared by neighbouring tiles.
    pub overlap_ratio: f32,
    /// IoS at or above which a lower-ranked detection is a duplicate.
    pub match_threshold: f32,
    pub band_count: u32,
    /// Tiles whose vegetation fraction falls below this are not sent to the detector.
    pub background_skip_fraction: f32,
    pub overcount_bias: OvercountBias,
    pub min_calibration_samples: usize,
    /// Object area used when a band has too few detections to calibrate.
    pub fallback_object_area_px: f64,
    /// Ellipse semi-axes as a fraction of half the box size.
    pub footprint_scale: f32,
    /// Gaussian sigma applied to footprints before re-thresholding (0 disables).
    pub footprint_blur_sigma: f32,
    /// Minimum mean `2G - R - B` for a luminance class to count as foliage.
    pub foliage_excess_green: f32,
    /// Radius of the square element used for the speckle opening (0 disables).
    pub opening_radius: u32,
    pub retry_backoff_ms: u64,
    /// Inference workers; defaults to available parallelism.
    pub workers: Option<usize>,
    pub vegetation: HsvRange,
    pub soil: HsvRange,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            overlap_ratio: 0.25,
            match_threshold: 0.5,
            band_count: 4,
            background_skip_fraction: 0.02,
            overcount_bias: OvercountBias::default(),
            min_calibration_samples: 10,
            fallback_object_area_px: 2500.0,
            footprint_scale: 0.85,
            footprint_blur_sigma: 1.5,
            foliage_excess_green: 8.0,
            opening_radius: 1,
            retry_backoff_ms: 50,
            workers: None,
            vegetation: HsvRange::vegetation(),
            soil: HsvRange::soil(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::TileSize);
        }
        if !(self.overlap_ratio.is_finite() && self.overlap_ratio >= 0.0 && self.overlap_ratio < 1.0) {
            return Err(ConfigError::OverlapRatio(self.overlap_ratio));
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(ConfigError::MatchThreshold(self.match_threshold));
        }
        if self.band_count == 0 {
            return Err(ConfigError::BandCount);
        }
        if !(0.0..=1.0).contains(&self.background_skip_fraction) {
            return Err(ConfigError::SkipFraction(self.background_skip_fraction));
        }
        OvercountBias::new(self.overcount_bias.get())?;
        if self.min_calibration_samples == 0 {
            return Err(ConfigError::CalibrationSamples);
        }
        if !(self.fallback_object_area_px.is_finite() && self.fallback_object_area_px > 0.0) {
            return Err(ConfigError::FallbackArea(self.fallback_object_area_px));
        }
        if !(self.footprint_scale > 0.0 && self.footprint_scale <= 1.0) {
            return Err(ConfigError::FootprintScale(self.footprint_scale));
        }
        if !(self.footprint_blur_sigma.is_finite() && self.footprint_blur_sigma >= 0.0) {
            return Err(ConfigError::BlurSigma(self.footprint_blur_sigma));
        }
        if !self.foliage_excess_green.is_finite() {
            return Err(ConfigError::FoliageExcessGreen(self.foliage_excess_green));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Workers);
        }
        self.vegetation
            .check()
            .map_err(|reason| ConfigError::HsvRange { name: "vegetation", reason })?;
        self.soil
            .check()
            .map_err(|reason| ConfigError::HsvRange { name: "soil", reason })?;
        Ok(())
    }

    /// Consumes the config and returns it only if every rule holds.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        })
    }
}

/// Detector backend settings. Only the TFLite backend reads the model fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: String, // "tflite"
    pub use_coral: bool,
    pub model_path: String,
    pub model_path_edgetpu: String,

    /// Model input size; tiles are resized to this before inference.
    pub img_w: u32,
    pub img_h: u32,
    pub class_names: Vec<String>,

    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub output_layout: String, // "ultralytics"

    /// Threads per interpreter.
    pub threads: u32,
    /// Interpreters loaded side by side so tiles can run concurrently.
    pub instances: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "tflite".into(),
            use_coral: false,
            model_path: "models/plants.tflite".into(),
            model_path_edgetpu: "models/plants_edgetpu.tflite".into(),
            img_w: 640,
            img_h: 640,
            class_names: vec!["plant".into()],
            conf_threshold: 0.25,
            nms_iou_threshold: 0.45,
            max_detections: 300,
            output_layout: "ultralytics".into(),
            threads: 2,
            instances: 1,
        }
    }
}

impl DetectorConfig {
    pub fn active_model_path(&self) -> &str {
        if self.use_coral { &self.model_path_edgetpu } else { &self.model_path }
    }
}
