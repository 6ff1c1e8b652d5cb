//! Glue between a detection service and the tracker.
//!
//! [`DetectionSource`] abstracts over an in-process [`crate::DetectionService`]
//! and a remote [`crate::DetectionClient`]; [`TrackerPipeline`] drives one
//! source and one [`crate::TrackManager`] frame by frame.

mod detector;
mod pipeline;

pub use detector::DetectionSource;
pub use pipeline::TrackerPipeline;
