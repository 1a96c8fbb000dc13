use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::detection::Detection;
use crate::geometry::{ios, BoxXyxy};

/// Greedy IoS merge of detections produced by overlapping tiles.
#[derive(Debug, Clone, Copy)]
pub struct CrossTileMerger {
    match_threshold: f32,
    cell_size: f32,
}

impl CrossTileMerger {
    /// `cell_size` only affects the spatial index, never the result.
    pub fn new(match_threshold: f32, cell_size: f32) -> Self {
        Self { match_threshold, cell_size: cell_size.max(1.0) }
    }

    /// Keeps the highest-ranked detection of every overlapping group.
    /// A candidate is dropped when its IoS against any kept detection reaches
    /// the threshold, so kept pairs always score strictly below it.
    pub fn merge(&self, mut dets: Vec<Detection>) -> Vec<Detection> {
        let total = dets.len();
        dets.sort_by(merge_order);

        // IoS is never negative, so at zero every pair is a duplicate,
        // including disjoint boxes that never share a grid cell.
        if self.match_threshold <= 0.0 {
            dets.truncate(1);
            debug!("merge: {} -> {} detections (threshold 0)", total, dets.len());
            return dets;
        }

        let mut grid = SpatialGrid::new(self.cell_size);
        let mut kept: Vec<(Detection, BoxXyxy)> = Vec::with_capacity(dets.len());

        'outer: for d in dets {
            let b = d.bbox();
            for k in grid.candidates(&b) {
                if ios(&b, &kept[k].1) >= self.match_threshold {
                    continue 'outer;
                }
            }
            grid.insert(&b, kept.len());
            kept.push((d, b));
        }

        debug!("merge: {} -> {} detections ({} duplicates)", total, kept.len(), total - kept.len());
        kept.into_iter().map(|(d, _)| d).collect()
    }
}

// Confidence descending, then earlier tile, then geometry so that equal
// inputs in any order produce the same ranking.
fn merge_order(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then(a.tile_index.cmp(&b.tile_index))
        .then(a.center_x.total_cmp(&b.center_x))
        .then(a.center_y.total_cmp(&b.center_y))
        .then(a.width.total_cmp(&b.width))
        .then(a.height.total_cmp(&b.height))
        .then_with(|| a.class_label.cmp(&b.class_label))
}

// Uniform grid over accepted boxes. Two boxes with a positive intersection
// always share at least one cell.
struct SpatialGrid {
    cell: f32,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialGrid {
    fn new(cell: f32) -> Self {
        Self { cell, buckets: HashMap::new() }
    }

    fn cell_range(&self, b: &BoxXyxy) -> (i64, i64, i64, i64) {
        let c = |v: f32| (v / self.cell).floor() as i64;
        (c(b.x0), c(b.y0), c(b.x1), c(b.y1))
    }

    fn insert(&mut self, b: &BoxXyxy, id: usize) {
        let (cx0, cy0, cx1, cy1) = self.cell_range(b);
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                self.buckets.entry((cx, cy)).or_default().push(id);
            }
        }
    }

    fn candidates(&self, b: &BoxXyxy) -> Vec<usize> {
        let (cx0, cy0, cx1, cy1) = self.cell_range(b);
        let mut out = Vec::new();
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                if let Some(ids) = self.buckets.get(&(cx, cy)) {
                    out.extend_from_slice(ids);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawDetection;
    use crate::remap::remap_with_offset;

    fn det(cx: f32, cy: f32, w: f32, h: f32, conf: f32, tile: usize) -> Detection {
        Detection { center_x: cx, center_y: cy, width: w, height: h, confidence: conf, class_label: "pot".into(), tile_index: tile }
    }

    #[test]
    fn same_object_from_two_tiles_merges_to_one() {
        let a = remap_with_offset(vec![RawDetection::from_corners(100.0, 100.0, 200.0, 200.0, 0.8, "pot")], 0.0, 0.0, 0);
        let b = remap_with_offset(vec![RawDetection::from_corners(0.0, 100.0, 100.0, 200.0, 0.7, "pot")], 100.0, 0.0, 1);
        let merged = CrossTileMerger::new(0.5, 512.0).merge(a.into_iter().chain(b).collect());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tile_index, 0);
    }

    #[test]
    fn clipped_partial_view_is_absorbed() {
        let full = det(500.0, 300.0, 80.0, 80.0, 0.9, 0);
        let clipped = det(520.0, 300.0, 40.0, 80.0, 0.6, 1);
        let merged = CrossTileMerger::new(0.5, 512.0).merge(vec![clipped, full.clone()]);
        assert_eq!(merged, vec![full]);
    }

    #[test]
    fn distant_objects_never_merge() {
        for (ca, cb) in [(0.9, 0.1), (0.1, 0.9), (0.5, 0.5)] {
            let a = det(100.0, 100.0, 60.0, 60.0, ca, 0);
            let b = det(600.0, 100.0, 60.0, 60.0, cb, 1);
            assert_eq!(CrossTileMerger::new(0.5, 64.0).merge(vec![a, b]).len(), 2);
        }
    }

    #[test]
    fn equal_confidence_prefers_earlier_tile() {
        let a = det(100.0, 100.0, 50.0, 50.0, 0.8, 3);
        let b = det(102.0, 100.0, 50.0, 50.0, 0.8, 1);
        let merged = CrossTileMerger::new(0.5, 512.0).merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tile_index, 1);
    }

    #[test]
    fn boxes_spanning_cells_are_still_compared() {
        // Cell size much smaller than the boxes; both straddle several cells.
        let a = det(63.0, 63.0, 50.0, 50.0, 0.9, 0);
        let b = det(66.0, 64.0, 50.0, 50.0, 0.5, 1);
        assert_eq!(CrossTileMerger::new(0.5, 8.0).merge(vec![b, a]).len(), 1);
    }

    #[test]
    fn zero_threshold_keeps_only_the_best_regardless_of_cells() {
        let dets = vec![
            det(20.0, 20.0, 20.0, 20.0, 0.6, 0),
            det(300.0, 20.0, 20.0, 20.0, 0.9, 1),
            det(20.0, 300.0, 20.0, 20.0, 0.7, 2),
        ];
        for cell in [64.0, 4096.0] {
            let merged = CrossTileMerger::new(0.0, cell).merge(dets.clone());
            assert_eq!(merged.len(), 1, "cell {}", cell);
            assert_eq!(merged[0].tile_index, 1);
        }
        assert!(CrossTileMerger::new(0.0, 64.0).merge(Vec::new()).is_empty());
    }

    #[test]
    fn threshold_is_exclusive_for_kept_pairs() {
        // IoS exactly 0.5: the lower-ranked box is a duplicate.
        let a = det(50.0, 50.0, 100.0, 100.0, 0.9, 0);
        let b = det(100.0, 50.0, 100.0, 100.0, 0.8, 1);
        assert_eq!(CrossTileMerger::new(0.5, 512.0).merge(vec![a.clone(), b.clone()]).len(), 1);
        assert_eq!(CrossTileMerger::new(0.51, 512.0).merge(vec![a, b]).len(), 2);
    }
}
