use crate::detection::{Detection, RawDetection};
use crate::tiling::TileRect;

/// Translates tile-local detections into original-image coordinates.
pub fn remap(raw: Vec<RawDetection>, tile: &TileRect) -> Vec<Detection> {
    let (dx, dy) = tile.offset();
    remap_with_offset(raw, dx, dy, tile.index)
}

pub fn remap_with_offset(raw: Vec<RawDetection>, dx: f32, dy: f32, tile_index: usize) -> Vec<Detection> {
    raw.into_iter()
        .map(|r| {
            debug_assert!(r.is_finite(), "non-finite detector output: {:?}", r);
            Detection {
                center_x: r.center_x + dx,
                center_y: r.center_y + dy,
                width: r.width,
                height: r.height,
                confidence: r.confidence,
                class_label: r.class_label,
                tile_index,
            }
        })
        .collect()
}

/// Drops detections that break the image-space invariants; returns how many were dropped.
pub fn retain_valid(dets: &mut Vec<Detection>, image_w: u32, image_h: u32) -> usize {
    let before = dets.len();
    dets.retain(|d| d.is_valid_for(image_w, image_h));
    before - dets.len()
}
