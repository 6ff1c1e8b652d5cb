//! Classical colour segmentation backend.
//!
//! Marks pixels whose RGB values pass a fixed threshold (red-dominant by
//! default, which suits ripe strawberries), groups them into 4-connected
//! components and reports each component large enough as one detection with
//! its pixel mask. Confidence is the fraction of the box the component fills.

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use super::{BackendAdapter, BackendArgs};
use crate::detection::{Detection, DetectionBuilder, Image, Mask};
use crate::error::BackendError;

pub const NAME: &str = "colour_threshold";

#[derive(Debug, Clone)]
pub struct ColourThresholdBackend {
    class_label: String,
    min_red: u8,
    max_green: u8,
    max_blue: u8,
    min_area: usize,
    /// Ignore pixels farther than this, or without depth, when a depth frame is given.
    max_depth_mm: Option<u16>,
}

impl ColourThresholdBackend {
    pub fn from_args(args: &BackendArgs) -> Result<Self, BackendError> {
        let class_label: String = args.require("class_label")?;
        if class_label.is_empty() {
            return Err(BackendError::InvalidArgument {
                name: "class_label".into(),
                reason: "must not be empty".into(),
            });
        }
        let min_area: usize = args.get_or("min_area", 20)?;
        if min_area == 0 {
            return Err(BackendError::InvalidArgument {
                name: "min_area".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            class_label,
            min_red: args.get_or("min_red", 150)?,
            max_green: args.get_or("max_green", 100)?,
            max_blue: args.get_or("max_blue", 100)?,
            min_area,
            max_depth_mm: args.get("max_depth_mm")?,
        })
    }

    fn foreground(&self, colour: &Image, depth: Option<&Image>) -> Result<GrayImage, BackendError> {
        let rgb = colour.to_rgb()?;
        let depth = match (depth, self.max_depth_mm) {
            (Some(d), Some(max)) if d.width == colour.width && d.height == colour.height => {
                Some((d, max))
            }
            _ => None,
        };

        let mut mask = GrayImage::new(rgb.width(), rgb.height());
        for (x, y, px) in rgb.enumerate_pixels() {
            let [r, g, b] = px.0;
            let mut keep = r >= self.min_red && g <= self.max_green && b <= self.max_blue;
            if let (true, Some((d, max))) = (keep, depth) {
                keep = matches!(d.depth_at(x, y)?, Some(mm) if mm > 0 && mm <= max);
            }
            if keep {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        Ok(mask)
    }
}

#[derive(Debug, Default)]
struct Component {
    xs: Vec<u32>,
    ys: Vec<u32>,
    min: (u32, u32),
    max: (u32, u32),
}

impl Component {
    fn push(&mut self, x: u32, y: u32) {
        if self.xs.is_empty() {
            self.min = (x, y);
            self.max = (x, y);
        } else {
            self.min = (self.min.0.min(x), self.min.1.min(y));
            self.max = (self.max.0.max(x), self.max.1.max(y));
        }
        self.xs.push(x);
        self.ys.push(y);
    }
}

impl BackendAdapter for ColourThresholdBackend {
    fn get_detections(
        &mut self,
        colour: &Image,
        depth: Option<&Image>,
    ) -> Result<Vec<Detection>, BackendError> {
        let foreground = self.foreground(colour, depth)?;
        let labels = connected_components(&foreground, Connectivity::Four, Luma([0u8]));

        let mut components: BTreeMap<u32, Component> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label != 0 {
                components.entry(label).or_default().push(x, y);
            }
        }

        let detections = components
            .into_values()
            .filter(|c| c.xs.len() >= self.min_area)
            .map(|c| {
                let w = (c.max.0 - c.min.0 + 1) as f32;
                let h = (c.max.1 - c.min.1 + 1) as f32;
                let fill = c.xs.len() as f32 / (w * h);
                DetectionBuilder::new()
                    .tlwh(c.min.0 as f32, c.min.1 as f32, w, h)
                    .class_label(self.class_label.clone())
                    .confidence(fill)
                    .mask(Mask::new(c.xs, c.ys))
                    .build()
            })
            .collect();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ImageEncoding;
    use crate::tracker::Rect;
    use image::{Rgb, RgbImage};

    fn backend(min_area: u32) -> ColourThresholdBackend {
        let args = BackendArgs::new()
            .with("class_label", "berry")
            .with("min_area", min_area);
        ColourThresholdBackend::from_args(&args).unwrap()
    }

    fn scene() -> Image {
        let mut img = RgbImage::from_pixel(40, 30, Rgb([20, 120, 30]));
        for y in 5..15 {
            for x in 4..12 {
                img.put_pixel(x, y, Rgb([220, 30, 40]));
            }
        }
        // Small speck below min_area.
        img.put_pixel(30, 25, Rgb([220, 30, 40]));
        Image::from_rgb(&img)
    }

    #[test]
    fn test_finds_red_blob() {
        let dets = backend(5).get_detections(&scene(), None).unwrap();
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert_eq!(det.bbox, Rect::new(4.0, 5.0, 8.0, 10.0));
        assert_eq!(det.class_label, "berry");
        assert!((det.confidence - 1.0).abs() < 1e-6);
        assert_eq!(det.mask.as_ref().unwrap().len(), 80);
    }

    #[test]
    fn test_depth_gate_removes_far_pixels() {
        let args = BackendArgs::new()
            .with("class_label", "berry")
            .with("min_area", 5)
            .with("max_depth_mm", 800);
        let mut backend = ColourThresholdBackend::from_args(&args).unwrap();
        let far: Vec<u8> = (0..40 * 30).flat_map(|_| 1500u16.to_ne_bytes()).collect();
        let depth = Image::new(40, 30, ImageEncoding::Depth16, far);
        assert!(backend.get_detections(&scene(), Some(&depth)).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_frame() {
        let bad = Image::new(4, 4, ImageEncoding::Rgb8, vec![0; 3]);
        assert!(backend(5).get_detections(&bad, None).is_err());
    }

    #[test]
    fn test_missing_label_argument() {
        let err = ColourThresholdBackend::from_args(&BackendArgs::new()).unwrap_err();
        assert!(matches!(err, BackendError::MissingArgument(ref n) if n == "class_label"));
    }
}
