//! Detector output records and the image messages detectors consume.

mod builder;
mod frame;
mod record;

pub use builder::DetectionBuilder;
pub use frame::{Image, ImageEncoding};
pub use record::{Detection, Mask};
