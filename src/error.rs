//! Error taxonomy for backends, the detection service and the tracker.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by a backend while being built or while running inference.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing required argument `{0}`")]
    MissingArgument(String),

    #[error("invalid value for argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("unsupported image encoding `{0}`")]
    UnsupportedEncoding(String),

    #[error("inference failed: {0}")]
    Inference(String),

    /// Inference failure raised by an in-process library, kept as the cause.
    #[error("inference failed: {context}")]
    InferenceSource {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Startup-time registry failures. All of these are fatal.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("backend `{0}` is already registered")]
    DuplicateBackend(String),

    #[error("unknown backend `{name}` (registered: {available})")]
    UnknownBackend { name: String, available: String },

    #[error("could not construct backend `{backend}`: {source}")]
    BackendConstruction {
        backend: String,
        #[source]
        source: BackendError,
    },
}

/// Errors a caller of the detection service can observe.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("backend `{backend}` failed on frame {frame_id}: {message}")]
    Inference {
        backend: String,
        frame_id: u64,
        message: String,
        /// The adapter's own error. Absent once the failure has crossed the wire.
        #[source]
        cause: Option<BackendError>,
    },

    #[error("detection timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("unknown backend `{0}`")]
    UnknownBackend(String),

    #[error("detection service has stopped")]
    ServiceStopped,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Wrap a backend library's error, keeping it reachable through `source()`.
    pub fn inference<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InferenceSource {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl ServiceError {
    /// Per-frame failures after which tracking simply continues with no detections.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Inference { .. } | Self::Timeout { .. })
    }
}

/// Kind tag carried across the wire so remote clients can rebuild a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BackendInference,
    DetectionTimeout,
    UnknownBackend,
    Internal,
}

/// Structured failure as transmitted in a service response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    pub backend: String,
    pub frame_id: u64,
    pub timeout_ms: Option<u64>,
}

impl WireError {
    pub fn from_service_error(err: &ServiceError, backend: &str, frame_id: u64) -> Self {
        let (kind, timeout_ms) = match err {
            ServiceError::Inference { .. } => (ErrorKind::BackendInference, None),
            ServiceError::Timeout { timeout } => {
                (ErrorKind::DetectionTimeout, Some(timeout.as_millis() as u64))
            }
            ServiceError::UnknownBackend(_)
            | ServiceError::Registry(RegistryError::UnknownBackend { .. }) => {
                (ErrorKind::UnknownBackend, None)
            }
            _ => (ErrorKind::Internal, None),
        };
        let message = match err {
            ServiceError::Inference { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind,
            message,
            backend: backend.to_string(),
            frame_id,
            timeout_ms,
        }
    }

    pub fn into_service_error(self) -> ServiceError {
        match self.kind {
            ErrorKind::BackendInference => ServiceError::Inference {
                backend: self.backend,
                frame_id: self.frame_id,
                message: self.message,
                cause: None,
            },
            ErrorKind::DetectionTimeout => ServiceError::Timeout {
                timeout: Duration::from_millis(self.timeout_ms.unwrap_or_default()),
            },
            ErrorKind::UnknownBackend => ServiceError::UnknownBackend(self.backend),
            ErrorKind::Internal => ServiceError::Protocol(self.message),
        }
    }
}

/// Tracker failures. Only invariant violations end up here.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("assignment infeasible for {detections} detections and {tracks} tracks: {reason}")]
    AssignmentInfeasible {
        detections: usize,
        tracks: usize,
        reason: String,
    },

    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of one detect-then-track cycle that could not be absorbed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    /// Backend resolution or service startup failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
