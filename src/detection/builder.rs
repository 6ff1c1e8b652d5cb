//! Builder for `Detection` records from the box formats detectors emit.

use super::{Detection, Mask};
use crate::tracker::Rect;

#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    class_label: String,
    confidence: f32,
    frame_id: u64,
    stamp: f64,
    mask: Option<Mask>,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corners `(x1, y1)` and `(x2, y2)`.
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Center `(cx, cy)` with width and height, as most YOLO heads produce.
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Top-left `(x, y)` with width and height.
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(x, y, w, h);
        self
    }

    pub fn class_label(mut self, label: impl Into<String>) -> Self {
        self.class_label = label.into();
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn frame(mut self, frame_id: u64, stamp: f64) -> Self {
        self.frame_id = frame_id;
        self.stamp = stamp;
        self
    }

    pub fn mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn build(self) -> Detection {
        let det = Detection::new(self.bbox, self.class_label, self.confidence)
            .at_frame(self.frame_id, self.stamp);
        match self.mask {
            Some(mask) => det.with_mask(mask),
            None => det,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .class_label("berry")
            .confidence(0.95)
            .frame(3, 0.1)
            .build();

        assert_eq!(det.confidence, 0.95);
        assert_eq!(det.bbox, Rect::new(10.0, 20.0, 40.0, 60.0));
        assert_eq!(det.frame_id, 3);
        assert_eq!(det.class_label, "berry");
    }

    #[test]
    fn test_xywh_centers_box() {
        let det = DetectionBuilder::new().xywh(50.0, 50.0, 20.0, 10.0).build();
        assert_eq!(det.bbox.center(), (50.0, 50.0));
    }
}
