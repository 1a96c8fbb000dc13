use crate::bands::{Band, CalibrationSource};
use crate::config::EngineConfig;
use crate::detection::Detection;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub object_area_px: f64,
    pub source: CalibrationSource,
    /// Samples left after outlier removal.
    pub samples: usize,
}

/// Expected single-object area per band, measured from the band's own detections.
#[derive(Debug, Clone, Copy)]
pub struct PerBandCalibrator {
    min_samples: usize,
    fallback_area_px: f64,
}

impl PerBandCalibrator {
    pub fn new(min_samples: usize, fallback_area_px: f64) -> Self {
        Self { min_samples, fallback_area_px }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.min_calibration_samples, cfg.fallback_object_area_px)
    }

    pub fn calibrate_areas(&self, areas: Vec<f64>) -> Calibration {
        let kept = iqr_filter(areas);
        if kept.len() < self.min_samples {
            return Calibration { object_area_px: self.fallback_area_px, source: CalibrationSource::Fallback, samples: kept.len() };
        }
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        Calibration { object_area_px: mean, source: CalibrationSource::Measured, samples: kept.len() }
    }

    /// Uses detections whose center lies in `[y_start, y_end)`.
    pub fn calibrate(&self, band: &mut Band, dets: &[Detection]) {
        let areas = dets.iter().filter(|d| band.contains_y(d.center_y)).map(Detection::area_px).collect();
        let c = self.calibrate_areas(areas);
        band.calibrated_object_area_px = c.object_area_px;
        band.calibration_source = c.source;
        band.calibration_samples = c.samples;
    }
}

/// Keeps values inside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
pub fn iqr_filter(mut values: Vec<f64>) -> Vec<f64> {
    values.retain(|v| v.is_finite());
    if values.len() < 2 {
        return values;
    }
    values.sort_by(f64::total_cmp);
    let q1 = quantile(&values, 0.25);
    let q3 = quantile(&values, 0.75);
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    values.retain(|&v| v >= lo && v <= hi);
    values
}

// Linear interpolation between order statistics; `sorted` must be non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
