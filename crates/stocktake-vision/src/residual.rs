use image::{imageops, GrayImage, Luma};
use imageproc::drawing::draw_filled_ellipse_mut;

use crate::config::EngineConfig;
use crate::detection::Detection;
use crate::mask::BinaryMask;

/// Area inside the region of interest that no accepted detection explains.
#[derive(Debug, Clone, Copy)]
pub struct ResidualMaskBuilder {
    footprint_scale: f32,
    blur_sigma: f32,
}

impl ResidualMaskBuilder {
    pub fn new(footprint_scale: f32, blur_sigma: f32) -> Self {
        Self { footprint_scale, blur_sigma }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.footprint_scale, cfg.footprint_blur_sigma)
    }

    /// Union of detection footprints: ellipses inset from each box, softened
    /// and re-thresholded so neighbouring footprints blend without hard corners.
    pub fn footprints(&self, width: u32, height: u32, dets: &[Detection]) -> BinaryMask {
        if dets.is_empty() || width == 0 || height == 0 {
            return BinaryMask::filled(width, height, false);
        }

        let mut canvas = GrayImage::new(width, height);
        for d in dets {
            // Pixel (x, y) covers [x, x+1); its centre sits at x + 0.5.
            let center = ((d.center_x - 0.5).round() as i32, (d.center_y - 0.5).round() as i32);
            let a = (self.footprint_scale * d.width / 2.0).round() as i32;
            let b = (self.footprint_scale * d.height / 2.0).round() as i32;
            if a > 0 && b > 0 {
                draw_filled_ellipse_mut(&mut canvas, center, a, b, Luma([u8::MAX]));
            }
        }

        let canvas = if self.blur_sigma > 0.0 { imageops::blur(&canvas, self.blur_sigma) } else { canvas };
        let data = canvas.as_raw().iter().map(|&v| v >= 128).collect();
        BinaryMask::from_vec(width, height, data).unwrap_or_else(|| BinaryMask::filled(width, height, false))
    }

    /// `roi AND NOT footprints`. A missing ROI means the whole image.
    pub fn build(&self, roi: Option<&BinaryMask>, width: u32, height: u32, dets: &[Detection]) -> BinaryMask {
        let covered = self.footprints(width, height, dets);
        let data = covered
            .as_slice()
            .iter()
            .enumerate()
            .map(|(i, &c)| !c && roi.map_or(true, |m| m.as_slice()[i]))
            .collect();
        BinaryMask::from_vec(width, height, data).unwrap_or_else(|| BinaryMask::filled(width, height, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32, w: f32, h: f32) -> Detection {
        Detection { center_x: cx, center_y: cy, width: w, height: h, confidence: 0.9, class_label: "pot".into(), tile_index: 0 }
    }

    #[test]
    fn no_detections_leaves_whole_roi() {
        let b = ResidualMaskBuilder::new(0.85, 1.5);
        let m = b.build(None, 40, 30, &[]);
        assert_eq!(m.count(), 1200);
    }

    #[test]
    fn ellipse_credits_less_than_the_box() {
        let b = ResidualMaskBuilder::new(0.85, 0.0);
        let fp = b.footprints(200, 200, &[det(100.0, 100.0, 80.0, 80.0)]);
        let area = fp.count() as f64;
        let expected = std::f64::consts::PI * 34.0 * 34.0;
        assert!((area - expected).abs() / expected < 0.05, "area {} vs {}", area, expected);
        assert!(area < 80.0 * 80.0);
        assert!(fp.get(100, 100));
        assert!(!fp.get(62, 62), "box corner must stay residual");
    }

    #[test]
    fn blur_keeps_footprint_size_close() {
        let sharp = ResidualMaskBuilder::new(0.85, 0.0).footprints(200, 200, &[det(100.0, 100.0, 80.0, 60.0)]).count() as f64;
        let soft = ResidualMaskBuilder::new(0.85, 1.5).footprints(200, 200, &[det(100.0, 100.0, 80.0, 60.0)]).count() as f64;
        assert!((sharp - soft).abs() / sharp < 0.1);
    }

    #[test]
    fn roi_restricts_residual() {
        let mut roi = BinaryMask::filled(100, 100, false);
        for y in 0..100 {
            for x in 0..50 {
                roi.set(x, y, true);
            }
        }
        let b = ResidualMaskBuilder::new(0.85, 0.0);
        let m = b.build(Some(&roi), 100, 100, &[det(75.0, 50.0, 40.0, 40.0)]);
        assert_eq!(m.count(), 5000);
        let m = b.build(Some(&roi), 100, 100, &[det(25.0, 50.0, 40.0, 40.0)]);
        assert!(m.count() < 5000);
        assert_eq!(m.count_rows(0, 100), m.count());
    }

    #[test]
    fn footprints_clip_at_image_edge() {
        let b = ResidualMaskBuilder::new(1.0, 0.0);
        let fp = b.footprints(50, 50, &[det(0.0, 0.0, 40.0, 40.0)]);
        assert!(fp.get(0, 0));
        assert!(fp.count() < 400);
    }
}
