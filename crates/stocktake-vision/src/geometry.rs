/// Axis-aligned box in pixel coordinates (`x0 <= x1`, `y0 <= y1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxXyxy {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoxXyxy {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { x0: cx - w / 2.0, y0: cy - h / 2.0, x1: cx + w / 2.0, y1: cy + h / 2.0 }
    }

    pub fn width(&self) -> f32 { (self.x1 - self.x0).max(0.0) }
    pub fn height(&self) -> f32 { (self.y1 - self.y0).max(0.0) }
    pub fn area(&self) -> f32 { self.width() * self.height() }

    pub fn intersection(&self, other: &BoxXyxy) -> f32 {
        let iw = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let ih = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        iw * ih
    }
}

/// Intersection over union.
pub fn iou(a: &BoxXyxy, b: &BoxXyxy) -> f32 {
    let inter = a.intersection(b);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Intersection over the area of the smaller box.
///
/// Two views of one object cut differently by tile borders overlap poorly
/// in IoU terms but the smaller view sits almost entirely inside the larger.
pub fn ios(a: &BoxXyxy, b: &BoxXyxy) -> f32 {
    let smaller = a.area().min(b.area());
    if smaller <= 0.0 { 0.0 } else { a.intersection(b) / smaller }
}
