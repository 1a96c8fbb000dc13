use stocktake_proto::report::{self as proto, DetectionRow, EstimationRow, RunReport, RunSummary};
use stocktake_vision::{CalibrationSource, PipelineResult};

pub fn build_report(run_id: &str, ts_unix_ms: i64, res: &PipelineResult) -> RunReport {
    let detections = res
        .detections
        .iter()
        .enumerate()
        .map(|(i, d)| DetectionRow {
            run_id: run_id.to_string(),
            index: i as u32,
            center_x: d.center_x,
            center_y: d.center_y,
            width: d.width,
            height: d.height,
            confidence: d.confidence,
            class_label: d.class_label.clone(),
            tile_index: d.tile_index as u32,
        })
        .collect();

    let estimations = res
        .estimations
        .iter()
        .map(|b| EstimationRow {
            run_id: run_id.to_string(),
            band_index: b.band_index,
            y_start: b.y_start,
            y_end: b.y_end,
            residual_area_px: b.residual_area_px,
            suppressed_area_px: b.suppressed_area_px,
            floor_area_px: b.floor_area_px,
            calibrated_object_area_px: b.calibrated_object_area_px,
            calibration_source: match b.calibration_source {
                CalibrationSource::Measured => proto::CalibrationSource::Measured,
                CalibrationSource::Fallback => proto::CalibrationSource::Fallback,
            },
            calibration_samples: b.calibration_samples as u32,
            estimated_count: b.estimated_count,
        })
        .collect();

    RunReport {
        summary: RunSummary {
            run_id: run_id.to_string(),
            ts_unix_ms,
            image_width: res.stats.image_width,
            image_height: res.stats.image_height,
            detected_count: res.detections.len() as u64,
            estimated_count: res.estimated_total(),
            total_count: res.total_count(),
            degraded: res.degraded,
            failed_tiles: res.tile_failures.iter().map(|f| f.tile_index as u32).collect(),
        },
        detections,
        estimations,
    }
}
