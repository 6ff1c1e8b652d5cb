use tracing::{debug, warn};

use super::DetectionSource;
use crate::error::PipelineError;
use crate::service::DetectionRequest;
use crate::tracker::{CycleOutput, TrackManager, TrackerConfig};

/// One detection source feeding one track manager.
///
/// A frame whose detection fails recoverably (backend error, timeout) still
/// runs a tracking cycle, with no detections, so tracks coast instead of
/// freezing.
pub struct TrackerPipeline<S: DetectionSource> {
    source: S,
    tracker: TrackManager,
}

impl<S: DetectionSource> TrackerPipeline<S> {
    pub fn new(source: S, config: TrackerConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            source,
            tracker: TrackManager::new(config)?,
        })
    }

    pub fn with_default_config(source: S) -> Result<Self, PipelineError> {
        Self::new(source, TrackerConfig::default())
    }

    /// Detect on one frame and advance the tracker by one cycle.
    pub fn process_frame(&mut self, request: &DetectionRequest) -> Result<CycleOutput, PipelineError> {
        let detections = match self.source.detect(request) {
            Ok(response) => {
                debug!(
                    frame_id = request.frame_id,
                    backend = %response.backend_name,
                    count = response.detections.len(),
                    duration_ms = response.duration_ms,
                    "detections received"
                );
                response.detections
            }
            Err(e) if e.is_recoverable() => {
                warn!(frame_id = request.frame_id, error = %e, "detection failed, tracking without detections");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.tracker.step(request.frame_id, request.stamp, &detections)?)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn tracker(&self) -> &TrackManager {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut TrackManager {
        &mut self.tracker
    }
}
