use ::image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Pixel layouts understood by the built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageEncoding {
    #[serde(rename = "rgb8")]
    Rgb8,
    #[serde(rename = "bgr8")]
    Bgr8,
    #[serde(rename = "mono8")]
    Mono8,
    /// Depth in millimetres, native endian.
    #[serde(rename = "16UC1")]
    Depth16,
}

impl ImageEncoding {
    pub fn parse(name: &str) -> Result<Self, BackendError> {
        match name {
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" => Ok(Self::Bgr8),
            "mono8" => Ok(Self::Mono8),
            "16UC1" | "mono16" => Ok(Self::Depth16),
            other => Err(BackendError::UnsupportedEncoding(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb8 => "rgb8",
            Self::Bgr8 => "bgr8",
            Self::Mono8 => "mono8",
            Self::Depth16 => "16UC1",
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Mono8 => 1,
            Self::Depth16 => 2,
        }
    }

    pub fn is_rgb_order(&self) -> bool {
        !matches!(self, Self::Bgr8)
    }
}

/// Raw image as delivered by the acquisition layer. Rows are tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, encoding: ImageEncoding, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            encoding: encoding.as_str().to_string(),
            data,
        }
    }

    pub fn from_rgb(img: &RgbImage) -> Self {
        Self::new(img.width(), img.height(), ImageEncoding::Rgb8, img.as_raw().clone())
    }

    pub fn encoding(&self) -> Result<ImageEncoding, BackendError> {
        ImageEncoding::parse(&self.encoding)
    }

    fn checked_encoding(&self) -> Result<ImageEncoding, BackendError> {
        let encoding = self.encoding()?;
        let expected = self.width as usize * self.height as usize * encoding.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(BackendError::InvalidArgument {
                name: "image".into(),
                reason: format!(
                    "{}x{} {} image needs {expected} bytes, got {}",
                    self.width,
                    self.height,
                    encoding.as_str(),
                    self.data.len()
                ),
            });
        }
        Ok(encoding)
    }

    /// Convert a colour or mono image to RGB.
    pub fn to_rgb(&self) -> Result<RgbImage, BackendError> {
        let encoding = self.checked_encoding()?;
        let (w, h) = (self.width, self.height);
        let img = match encoding {
            ImageEncoding::Rgb8 => RgbImage::from_raw(w, h, self.data.clone()),
            ImageEncoding::Bgr8 => Some(RgbImage::from_fn(w, h, |x, y| {
                let i = (y as usize * w as usize + x as usize) * 3;
                Rgb([self.data[i + 2], self.data[i + 1], self.data[i]])
            })),
            ImageEncoding::Mono8 => Some(RgbImage::from_fn(w, h, |x, y| {
                let v = self.data[y as usize * w as usize + x as usize];
                Rgb([v, v, v])
            })),
            ImageEncoding::Depth16 => {
                return Err(BackendError::UnsupportedEncoding(encoding.as_str().to_string()));
            }
        };
        img.ok_or_else(|| BackendError::Inference("image buffer size mismatch".into()))
    }

    /// Depth value at a pixel for `16UC1` images.
    pub fn depth_at(&self, x: u32, y: u32) -> Result<Option<u16>, BackendError> {
        let encoding = self.checked_encoding()?;
        if encoding != ImageEncoding::Depth16 {
            return Err(BackendError::UnsupportedEncoding(self.encoding.clone()));
        }
        if x >= self.width || y >= self.height {
            return Ok(None);
        }
        let i = (y as usize * self.width as usize + x as usize) * 2;
        Ok(Some(u16::from_ne_bytes([self.data[i], self.data[i + 1]])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_is_swapped() {
        let img = Image::new(1, 1, ImageEncoding::Bgr8, vec![1, 2, 3]);
        let rgb = img.to_rgb().unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([3, 2, 1]));
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let img = Image::new(2, 2, ImageEncoding::Rgb8, vec![0; 5]);
        assert!(matches!(img.to_rgb(), Err(BackendError::InvalidArgument { .. })));
    }

    #[test]
    fn test_unknown_encoding() {
        let img = Image {
            width: 1,
            height: 1,
            encoding: "yuv422".into(),
            data: vec![0, 0],
        };
        assert!(matches!(img.to_rgb(), Err(BackendError::UnsupportedEncoding(_))));
    }

    #[test]
    fn test_depth_lookup() {
        let data = [500u16, 1200].iter().flat_map(|d| d.to_ne_bytes()).collect();
        let img = Image::new(2, 1, ImageEncoding::Depth16, data);
        assert_eq!(img.depth_at(1, 0).unwrap(), Some(1200));
        assert_eq!(img.depth_at(5, 0).unwrap(), None);
    }
}
