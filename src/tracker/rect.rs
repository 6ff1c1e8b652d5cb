use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
///
/// Stored as TLWH (top-left x, top-left y, width, height). The tracker's
/// filter works in XYAH (center x, center y, aspect ratio w/h, height).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl Rect {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning two corners (x1, y1) and (x2, y2).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Box from center, aspect ratio (w/h) and height.
    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Corners as `[x1, y1, x2, y2]`.
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// Center, aspect ratio (w/h) and height. A box without height has aspect 0.
    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, self.height]
    }

    /// XYAH widened to `f64` for the Kalman filter.
    #[inline]
    pub fn to_xyah_f64(&self) -> [f64; 4] {
        self.to_xyah().map(f64::from)
    }

    /// Center point `(cx, cy)`.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area, with negative extents counted as zero.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Intersection over union. Degenerate boxes have zero overlap with everything.
    pub fn iou(&self, other: &Rect) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.to_tlbr();
        let [bx1, by1, bx2, by2] = other.to_tlbr();

        let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter_area = inter_w * inter_h;

        let union_area = self.area() + other.area() - inter_area;
        if union_area > 0.0 {
            (inter_area / union_area).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
