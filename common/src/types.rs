use serde::{Deserialize, Serialize};

/// Axis-aligned box in image pixel coordinates.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// A box degenerated to a single point.
    pub fn point(x: f32, y: f32) -> Self {
        Self { xmin: x, ymin: y, xmax: x, ymax: y }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Grow the box to cover `(x, y)`.
    pub fn extend(&mut self, x: f32, y: f32) {
        self.xmin = self.xmin.min(x);
        self.xmax = self.xmax.max(x);
        self.ymin = self.ymin.min(y);
        self.ymax = self.ymax.max(y);
    }

    /// Union with another box, in place.
    pub fn merge(&mut self, other: &BBox) {
        self.xmin = self.xmin.min(other.xmin);
        self.xmax = self.xmax.max(other.xmax);
        self.ymin = self.ymin.min(other.ymin);
        self.ymax = self.ymax.max(other.ymax);
    }

    /// True when `(x, y)` falls strictly inside the box inflated by `margin`
    /// on every side.
    pub fn contains_with_margin(&self, x: f32, y: f32, margin: f32) -> bool {
        (self.ymin - margin) < y
            && y < (self.ymax + margin)
            && (self.xmin - margin) < x
            && x < (self.xmax + margin)
    }
}

/// One LiDAR return projected onto the camera plane: integer pixel
/// coordinate plus the measured range in meters.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LidarPoint {
    pub x: i32,
    pub y: i32,
    pub range: f32,
}

impl LidarPoint {
    pub fn new(x: i32, y: i32, range: f32) -> Self {
        Self { x, y, range }
    }
}

/// A decoded detector result row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
    pub class_label: String,
}

/// A decoded classifier result for one batch sample.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Classification {
    pub class_id: u32,
    pub class_label: String,
    pub confidence: f32,
}
