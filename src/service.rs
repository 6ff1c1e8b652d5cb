//! Detection service: one backend behind a request/response boundary.
//!
//! [`DetectionService`] owns the adapter on a dedicated worker thread so
//! calls never overlap, whatever the number of callers. [`DetectionServer`]
//! exposes a service over TCP on tokio using the codec in [`protocol`].
//! [`AsyncDetectionClient`] is the matching remote caller and
//! [`DetectionClient`] its blocking wrapper.

mod client;
pub mod protocol;
mod server;
mod worker;

use serde::{Deserialize, Serialize};

use crate::detection::{Detection, Image};

pub use client::{AsyncDetectionClient, DetectionClient};
pub use server::{DetectionServer, ServerHandle};
pub use worker::DetectionService;

/// One colour frame, an optional aligned depth frame and their identity.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub colour: Image,
    pub depth: Option<Image>,
    pub frame_id: u64,
    /// Capture time in seconds.
    pub stamp: f64,
}

impl DetectionRequest {
    pub fn new(colour: Image, frame_id: u64, stamp: f64) -> Self {
        Self {
            colour,
            depth: None,
            frame_id,
            stamp,
        }
    }

    pub fn with_depth(mut self, depth: Image) -> Self {
        self.depth = Some(depth);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
    pub backend_name: String,
    /// Wall time the adapter spent on the frame.
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long a caller waits for a result before giving up on it.
    pub timeout_ms: u64,
    /// Requests allowed to wait behind the one in flight.
    pub queue_depth: usize,
    /// Address the TCP server binds, `host:port`.
    pub listen_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            queue_depth: 4,
            listen_addr: "127.0.0.1:7878".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}
