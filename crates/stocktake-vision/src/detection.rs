use serde::{Deserialize, Serialize};

use crate::geometry::BoxXyxy;

/// Detector output for one tile, in tile-local pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub class_label: String,
}

impl RawDetection {
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32, confidence: f32, class_label: impl Into<String>) -> Self {
        Self {
            center_x: (x0 + x1) / 2.0,
            center_y: (y0 + y1) / 2.0,
            width: x1 - x0,
            height: y1 - y0,
            confidence,
            class_label: class_label.into(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.center_x.is_finite()
            && self.center_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.confidence.is_finite()
    }
}

/// A detection in original-image pixels. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub class_label: String,
    /// Row-major index of the tile that produced it.
    pub tile_index: usize,
}

impl Detection {
    pub fn bbox(&self) -> BoxXyxy {
        BoxXyxy::from_center(self.center_x, self.center_y, self.width, self.height)
    }

    pub fn area_px(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Whether the detection satisfies the image-space invariants.
    pub fn is_valid_for(&self, image_w: u32, image_h: u32) -> bool {
        self.center_x.is_finite()
            && self.center_y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.center_x >= 0.0
            && self.center_y >= 0.0
            && self.center_x < image_w as f32
            && self.center_y < image_h as f32
            && self.width > 0.0
            && self.height > 0.0
            && self.confidence > 0.0
            && self.confidence <= 1.0
    }
}
