//! Drawing detections onto frames for inspection.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect as PixelRect;

use crate::detection::{Detection, Image, ImageEncoding};
use crate::error::BackendError;

const DEFAULT_PALETTE: [[u8; 3]; 22] = [
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [250, 190, 190],
    [0, 128, 128],
    [230, 190, 255],
    [170, 110, 40],
    [255, 250, 200],
    [128, 0, 0],
    [170, 255, 195],
    [128, 128, 0],
    [255, 215, 180],
    [0, 0, 128],
    [128, 128, 128],
    [255, 255, 255],
    [0, 0, 0],
];

/// Class index to colour lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelColours {
    colours: Vec<[u8; 3]>,
}

impl Default for LabelColours {
    fn default() -> Self {
        Self {
            colours: DEFAULT_PALETTE.to_vec(),
        }
    }
}

impl LabelColours {
    /// Falls back to the default palette when `colours` is empty.
    pub fn new(colours: Vec<[u8; 3]>) -> Self {
        if colours.is_empty() {
            return Self::default();
        }
        Self { colours }
    }

    /// Default palette with channels ordered for `encoding`.
    pub fn for_encoding(encoding: ImageEncoding) -> Self {
        let mut colours = Self::default();
        if !encoding.is_rgb_order() {
            for c in &mut colours.colours {
                c.reverse();
            }
        }
        colours
    }

    pub fn len(&self) -> usize {
        self.colours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colours.is_empty()
    }

    /// Negative indices are mirrored, indices past the end wrap around.
    pub fn get(&self, index: i64) -> [u8; 3] {
        let i = index.unsigned_abs() as usize % self.colours.len();
        self.colours[i]
    }
}

/// Draw each detection's box in its class colour and tint its mask.
///
/// The colour index of a detection is the position of its label in
/// `class_labels`; unlisted labels share the index `class_labels.len()`.
pub fn draw_detections(
    canvas: &mut RgbImage,
    detections: &[Detection],
    class_labels: &[String],
    colours: &LabelColours,
) {
    for det in detections {
        let index = class_labels
            .iter()
            .position(|l| *l == det.class_label)
            .unwrap_or(class_labels.len());
        let colour = colours.get(index as i64);

        if let Some(mask) = &det.mask {
            for (x, y) in mask.pixels() {
                if x >= canvas.width() || y >= canvas.height() {
                    continue;
                }
                let px = canvas.get_pixel_mut(x, y);
                for (channel, tint) in px.0.iter_mut().zip(colour) {
                    *channel = (*channel / 2).saturating_add(tint / 2);
                }
            }
        }

        if !det.bbox.is_finite() {
            continue;
        }
        let [x1, y1, x2, y2] = det.bbox.to_tlbr();
        // One pixel of slack beyond the canvas keeps clipped edges undrawn.
        let max_x = canvas.width() as f32 + 1.0;
        let max_y = canvas.height() as f32 + 1.0;
        let x1 = x1.floor().clamp(-1.0, max_x) as i32;
        let y1 = y1.floor().clamp(-1.0, max_y) as i32;
        let x2 = x2.ceil().clamp(-1.0, max_x) as i32;
        let y2 = y2.ceil().clamp(-1.0, max_y) as i32;
        let w = (x2 - x1).max(1) as u32;
        let h = (y2 - y1).max(1) as u32;
        draw_hollow_rect_mut(canvas, PixelRect::at(x1, y1).of_size(w, h), Rgb(colour));
    }
}

/// Annotate a raw frame in place. Colour frames keep their channel order;
/// mono frames are promoted to `rgb8`.
pub fn annotate_image(
    image: &mut Image,
    detections: &[Detection],
    class_labels: &[String],
) -> Result<(), BackendError> {
    let encoding = image.encoding()?;
    let mut canvas = match encoding {
        ImageEncoding::Bgr8 | ImageEncoding::Rgb8 => {
            if image.data.len() != image.width as usize * image.height as usize * 3 {
                return Err(BackendError::InvalidArgument {
                    name: "image".into(),
                    reason: "buffer does not match dimensions".into(),
                });
            }
            RgbImage::from_raw(image.width, image.height, std::mem::take(&mut image.data))
                .ok_or_else(|| BackendError::Inference("image buffer size mismatch".into()))?
        }
        ImageEncoding::Mono8 => image.to_rgb()?,
        ImageEncoding::Depth16 => {
            return Err(BackendError::UnsupportedEncoding(encoding.as_str().to_string()));
        }
    };
    draw_detections(
        &mut canvas,
        detections,
        class_labels,
        &LabelColours::for_encoding(encoding),
    );
    if encoding == ImageEncoding::Mono8 {
        image.encoding = ImageEncoding::Rgb8.as_str().to_string();
    }
    image.data = canvas.into_raw();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Mask;
    use crate::tracker::Rect;

    #[test]
    fn test_palette_indexing() {
        let colours = LabelColours::default();
        assert_eq!(colours.len(), 22);
        assert_eq!(colours.get(-3), colours.get(3));
        assert_eq!(colours.get(22), colours.get(0));
        assert_eq!(colours.get(45), colours.get(1));
    }

    #[test]
    fn test_bgr_palette_is_reversed() {
        let bgr = LabelColours::for_encoding(ImageEncoding::Bgr8);
        assert_eq!(bgr.get(0), [75, 25, 230]);
        assert_eq!(LabelColours::for_encoding(ImageEncoding::Rgb8).get(0), [230, 25, 75]);
    }

    #[test]
    fn test_box_and_mask_are_drawn() {
        let mut canvas = RgbImage::from_pixel(20, 20, Rgb([100, 100, 100]));
        let det = Detection::new(Rect::new(2.0, 2.0, 10.0, 10.0), "flower", 0.9)
            .with_mask(Mask::new(vec![5], vec![5]));
        let labels = vec!["berry".to_string(), "flower".to_string()];
        draw_detections(&mut canvas, &[det], &labels, &LabelColours::default());

        assert_eq!(canvas.get_pixel(2, 2), &Rgb([60, 180, 75]));
        assert_eq!(canvas.get_pixel(5, 5), &Rgb([50 + 30, 50 + 90, 50 + 37]));
        assert_eq!(canvas.get_pixel(15, 15), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_extreme_boxes_are_clipped() {
        let mut canvas = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let huge = Detection::new(Rect::new(-3.0e38, -3.0e38, f32::MAX, f32::MAX), "berry", 0.9);
        let nan = Detection::new(Rect::new(f32::NAN, 2.0, 4.0, f32::NAN), "berry", 0.9);
        let labels = vec!["berry".to_string()];
        draw_detections(&mut canvas, &[huge, nan], &labels, &LabelColours::default());
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));

        let far = Detection::new(Rect::new(2.0, 2.0, 1.0e9, 1.0e9), "berry", 0.9);
        draw_detections(&mut canvas, &[far], &labels, &LabelColours::default());
        assert_eq!(canvas.get_pixel(2, 2), &Rgb([230, 25, 75]));
        assert_eq!(canvas.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_mono_promotes_to_rgb() {
        let mut image = Image::new(8, 8, ImageEncoding::Mono8, vec![0; 64]);
        let det = Detection::new(Rect::new(1.0, 1.0, 4.0, 4.0), "berry", 0.9);
        annotate_image(&mut image, &[det], &["berry".to_string()]).unwrap();
        assert_eq!(image.encoding, "rgb8");
        assert_eq!(image.data.len(), 8 * 8 * 3);
        assert_eq!(&image.data[(8 + 1) * 3..(8 + 1) * 3 + 3], &[230, 25, 75]);
    }
}
