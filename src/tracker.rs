//! Multi-object tracking: Kalman filtering, association and track lifecycle.

mod kalman_filter;
pub mod matching;
mod rect;
mod track;
mod track_manager;
mod track_status;

pub use kalman_filter::{FilterError, KalmanFilter, NoiseModel};
pub use matching::{Assignment, AssociationConfig};
pub use rect::Rect;
pub use track::{Track, TrackedObject};
pub use track_manager::{CycleOutput, TrackManager, TrackerConfig};
pub use track_status::TrackStatus;
