use crate::detection::RawDetection;
use crate::geometry::{iou, BoxXyxy};

/// Decodes the common Ultralytics export `[cx, cy, w, h, obj, cls0..]` with
/// coordinates normalized to the model input, scaling them to a tile of
/// `tile_w` x `tile_h` pixels.
pub fn decode_ultralytics(
    raw: &[f32],
    num_preds: usize,
    class_names: &[String],
    conf_th: f32,
    tile_w: u32,
    tile_h: u32,
) -> Vec<RawDetection> {
    let num_classes = class_names.len();
    let stride = 5 + num_classes;
    let (sx, sy) = (tile_w as f32, tile_h as f32);
    let mut out = Vec::new();

    for i in 0..num_preds {
        let base = i * stride;
        if base + stride > raw.len() { break; }
        let row = &raw[base..base + stride];
        let obj = row[4];

        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for (c, &p) in row[5..].iter().enumerate() {
            if p > best_p { best_p = p; best_c = c; }
        }
        let conf = obj * best_p;
        if conf >= conf_th && conf > 0.0 {
            out.push(RawDetection {
                center_x: row[0] * sx,
                center_y: row[1] * sy,
                width: row[2] * sx,
                height: row[3] * sy,
                confidence: conf.min(1.0),
                class_label: class_names[best_c].clone(),
            });
        }
    }
    out
}

/// Per-tile IoU NMS. Cross-tile duplicates are handled later by IoS merging.
pub fn nms_filter(mut dets: Vec<RawDetection>, iou_th: f32, max_det: usize) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<(RawDetection, BoxXyxy)> = Vec::new();

    'outer: for d in dets {
        let b = BoxXyxy::from_center(d.center_x, d.center_y, d.width, d.height);
        for (_, k) in &kept {
            if iou(&b, k) >= iou_th {
                continue 'outer;
            }
        }
        kept.push((d, b));
        if kept.len() >= max_det { break; }
    }
    kept.into_iter().map(|(d, _)| d).collect()
}
