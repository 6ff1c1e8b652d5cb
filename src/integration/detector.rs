use std::sync::Arc;

use crate::error::ServiceError;
use crate::service::{DetectionClient, DetectionRequest, DetectionResponse, DetectionService};

/// Anything that can turn a frame into detections.
///
/// Implemented for the in-process service (owned, borrowed or shared) and for
/// the TCP client, so a pipeline does not care where the backend runs.
///
/// # Example
///
/// ```ignore
/// use berry_perception::{DetectionRequest, DetectionResponse, DetectionSource, ServiceError};
///
/// struct Nothing;
///
/// impl DetectionSource for Nothing {
///     fn detect(&mut self, _request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
///         Ok(DetectionResponse {
///             detections: vec![],
///             backend_name: "nothing".into(),
///             duration_ms: 0.0,
///         })
///     }
/// }
/// ```
pub trait DetectionSource {
    fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError>;
}

impl DetectionSource for DetectionService {
    fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        DetectionService::detect(self, request.clone())
    }
}

impl DetectionSource for &DetectionService {
    fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        DetectionService::detect(self, request.clone())
    }
}

impl DetectionSource for Arc<DetectionService> {
    fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        DetectionService::detect(self, request.clone())
    }
}

impl DetectionSource for DetectionClient {
    fn detect(&mut self, request: &DetectionRequest) -> Result<DetectionResponse, ServiceError> {
        DetectionClient::detect(self, request)
    }
}
