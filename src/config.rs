//! TOML configuration for a perception node.
//!
//! ```toml
//! [backend]
//! name = "colour_threshold"
//!
//! [backend.args]
//! class_label = "strawberry"
//! min_area = 40
//!
//! [service]
//! timeout_ms = 500
//!
//! [tracker]
//! max_coast = 5
//! ```
//!
//! Every section and key is optional except `backend.name`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::BackendArgs;
use crate::error::{ConfigError, ServiceError};
use crate::integration::TrackerPipeline;
use crate::service::{DetectionService, ServiceConfig};
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSelection {
    pub name: String,
    pub args: BackendArgs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub backend: BackendSelection,
    pub service: ServiceConfig,
    pub tracker: TrackerConfig,
}

impl PerceptionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), backend = %config.backend.name, "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.name.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.name must be set".into()));
        }
        if self.service.timeout_ms == 0 {
            return Err(ConfigError::Invalid("service.timeout_ms must be positive".into()));
        }
        if self.service.queue_depth == 0 {
            return Err(ConfigError::Invalid("service.queue_depth must be positive".into()));
        }
        self.tracker
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Construct the configured backend from the process-wide registry and
    /// start a service for it.
    pub fn build_service(&self) -> Result<DetectionService, ServiceError> {
        DetectionService::from_registry(&self.backend.name, &self.backend.args, &self.service)
    }

    /// Service plus tracker, ready for the first frame.
    pub fn build_pipeline(&self) -> Result<TrackerPipeline<DetectionService>, ConfigError> {
        let service = self.build_service()?;
        Ok(TrackerPipeline::new(service, self.tracker.clone())?)
    }
}
