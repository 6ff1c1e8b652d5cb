//! Perception core for an agricultural robot.
//!
//! Interchangeable detector backends sit behind a [`BackendAdapter`] and are
//! served by a [`DetectionService`], locally or over TCP. Their per-frame
//! [`Detection`]s feed a [`TrackManager`] that keeps persistent identities
//! using a constant-velocity Kalman filter and IoU-based global assignment.

pub mod backend;
pub mod config;
pub mod detection;
pub mod error;
pub mod integration;
pub mod service;
pub mod tracker;
pub mod visualisation;

pub use backend::{BackendAdapter, BackendArgs, BackendRegistry, register_backend, resolve_backend};
pub use config::PerceptionConfig;
pub use detection::{Detection, DetectionBuilder, Image, Mask};
pub use error::{
    BackendError, ConfigError, PipelineError, RegistryError, ServiceError, TrackerError,
};
pub use integration::{DetectionSource, TrackerPipeline};
pub use service::{
    AsyncDetectionClient, DetectionClient, DetectionRequest, DetectionResponse, DetectionServer, DetectionService,
    ServiceConfig,
};
pub use tracker::{CycleOutput, Rect, TrackManager, TrackStatus, TrackedObject, TrackerConfig};
pub use visualisation::{LabelColours, draw_detections};
