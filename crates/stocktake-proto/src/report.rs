use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    Measured,
    Fallback,
}

/// One merged detection in original-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRow {
    pub run_id: String,
    pub index: u32,
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub class_label: String,
    pub tile_index: u32,
}

/// Estimation result for one band, numbered from 1 at the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationRow {
    pub run_id: String,
    pub band_index: u32,
    pub y_start: u32,
    pub y_end: u32,
    pub residual_area_px: u64,
    pub suppressed_area_px: u64,
    pub floor_area_px: u64,
    pub calibrated_object_area_px: f64,
    pub calibration_source: CalibrationSource,
    pub calibration_samples: u32,
    pub estimated_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub ts_unix_ms: i64,
    pub image_width: u32,
    pub image_height: u32,
    pub detected_count: u64,
    pub estimated_count: u64,
    pub total_count: u64,
    // Counts may be low when tiles failed inference
    pub degraded: bool,
    pub failed_tiles: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub detections: Vec<DetectionRow>,
    pub estimations: Vec<EstimationRow>,
}

impl RunReport {
    /// Bands and summary agree on the estimated count.
    pub fn is_consistent(&self) -> bool {
        let est: u64 = self.estimations.iter().map(|e| e.estimated_count).sum();
        est == self.summary.estimated_count
            && self.detections.len() as u64 == self.summary.detected_count
            && self.summary.total_count == self.summary.detected_count + self.summary.estimated_count
    }
}
