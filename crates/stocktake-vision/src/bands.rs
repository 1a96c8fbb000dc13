use serde::{Deserialize, Serialize};

use crate::mask::BinaryMask;

/// Where a band's expected object area came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Mean of the band's own detections after outlier removal.
    Measured,
    /// Too few detections; the configured default area was used.
    Fallback,
}

/// One horizontal slice of the residual mask, numbered 1..N top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub band_index: u32,
    pub y_start: u32,
    pub y_end: u32,
    pub residual_area_px: u64,
    pub suppressed_area_px: u64,
    pub floor_area_px: u64,
    /// Otsu level separating the two luminance classes, when one existed.
    pub luma_threshold: Option<u8>,
    pub calibrated_object_area_px: f64,
    pub calibration_source: CalibrationSource,
    pub calibration_samples: usize,
    pub estimated_count: u64,
}

impl Band {
    pub fn new(band_index: u32, y_start: u32, y_end: u32, residual_area_px: u64) -> Self {
        Self {
            band_index,
            y_start,
            y_end,
            residual_area_px,
            suppressed_area_px: 0,
            floor_area_px: 0,
            luma_threshold: None,
            calibrated_object_area_px: 0.0,
            calibration_source: CalibrationSource::Fallback,
            calibration_samples: 0,
            estimated_count: 0,
        }
    }

    pub fn contains_y(&self, y: f32) -> bool {
        y >= self.y_start as f32 && y < self.y_end as f32
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BandPartitioner {
    band_count: u32,
}

impl BandPartitioner {
    pub fn new(band_count: u32) -> Self {
        Self { band_count: band_count.max(1) }
    }

    /// Equal-height bands; integer boundaries `floor(i * H / N)`.
    pub fn partition(&self, residual: &BinaryMask) -> Vec<Band> {
        let h = residual.height() as u64;
        let n = self.band_count as u64;
        (0..n)
            .map(|i| {
                let y_start = (i * h / n) as u32;
                let y_end = ((i + 1) * h / n) as u32;
                Band::new(i as u32 + 1, y_start, y_end, residual.count_rows(y_start, y_end))
            })
            .collect()
    }
}
