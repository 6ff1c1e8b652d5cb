use serde::{Deserialize, Deserializer, Serialize};

use crate::tracker::Rect;

/// Instance mask as the list of pixel coordinates it covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub xs: Vec<u32>,
    pub ys: Vec<u32>,
}

impl Mask {
    pub fn new(xs: Vec<u32>, ys: Vec<u32>) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        Self { xs, ys }
    }

    pub fn len(&self) -> usize {
        self.xs.len().min(self.ys.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

/// One detector output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub frame_id: u64,
    /// Capture time in seconds.
    pub stamp: f64,
    /// Box in TLWH pixel coordinates.
    pub bbox: Rect,
    pub class_label: String,
    /// Always within `[0, 1]`.
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Mask>,
}

impl Detection {
    pub fn new(bbox: Rect, class_label: impl Into<String>, confidence: f32) -> Self {
        Self {
            frame_id: 0,
            stamp: 0.0,
            bbox,
            class_label: class_label.into(),
            confidence: clamp_confidence(confidence),
            mask: None,
        }
    }

    /// Stamp the record with the frame it was produced for.
    pub fn at_frame(mut self, frame_id: u64, stamp: f64) -> Self {
        self.frame_id = frame_id;
        self.stamp = stamp;
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Clamp into `[0, 1]`, mapping NaN to zero.
pub(crate) fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f32>::deserialize(deserializer)?;
    Ok(value.map(clamp_confidence).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(Detection::new(rect, "berry", 1.7).confidence, 1.0);
        assert_eq!(Detection::new(rect, "berry", -0.2).confidence, 0.0);
        assert_eq!(Detection::new(rect, "berry", f32::NAN).confidence, 0.0);
    }

    #[test]
    fn test_json_round_trip() {
        let det = Detection::new(Rect::new(10.5, 20.25, 30.0, 40.0), "berry", 0.9)
            .at_frame(42, 1_602_000_000.125)
            .with_mask(Mask::new(vec![11, 12], vec![21, 21]));
        let json = serde_json::to_string(&det).unwrap();
        let back: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn test_out_of_range_confidence_clamped_on_deserialize() {
        let json = r#"{"frame_id":1,"stamp":0.0,"bbox":{"x":0.0,"y":0.0,"width":1.0,"height":1.0},
            "class_label":"berry","confidence":3.5}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.confidence, 1.0);
        assert!(det.mask.is_none());
    }
}
