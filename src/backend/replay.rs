//! Backend that plays back previously recorded detections.
//!
//! Recordings are JSON arrays of `Detection` records. The n-th call returns
//! the records whose `frame_id` equals the first recorded frame id plus n;
//! frames without records produce no detections. With `loop = true` the
//! recording restarts once exhausted.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use super::{BackendAdapter, BackendArgs};
use crate::detection::{Detection, Image};
use crate::error::BackendError;

pub const NAME: &str = "replay";

#[derive(Debug, Clone)]
pub struct ReplayBackend {
    frames: BTreeMap<u64, Vec<Detection>>,
    first_frame: u64,
    span: u64,
    cursor: u64,
    looping: bool,
}

impl ReplayBackend {
    pub fn new(detections: Vec<Detection>, looping: bool) -> Self {
        let mut frames: BTreeMap<u64, Vec<Detection>> = BTreeMap::new();
        for det in detections {
            frames.entry(det.frame_id).or_default().push(det);
        }
        let first_frame = frames.keys().next().copied().unwrap_or(0);
        let span = frames
            .keys()
            .next_back()
            .map_or(0, |last| last - first_frame + 1);
        Self {
            frames,
            first_frame,
            span,
            cursor: 0,
            looping,
        }
    }

    /// Accepts `path` (JSON file) or inline `detections`, plus optional `loop`.
    pub fn from_args(args: &BackendArgs) -> Result<Self, BackendError> {
        let looping = args.get_or("loop", false)?;
        if let Some(inline) = args.get::<Vec<Detection>>("detections")? {
            return Ok(Self::new(inline, looping));
        }
        let path: PathBuf = args.require("path")?;
        let text = fs::read_to_string(&path)?;
        let detections: Vec<Detection> =
            serde_json::from_str(&text).map_err(|e| BackendError::InvalidArgument {
                name: "path".into(),
                reason: format!("{}: {e}", path.display()),
            })?;
        Ok(Self::new(detections, looping))
    }

    pub fn remaining(&self) -> u64 {
        self.span.saturating_sub(self.cursor)
    }
}

impl BackendAdapter for ReplayBackend {
    fn get_detections(
        &mut self,
        _colour: &Image,
        _depth: Option<&Image>,
    ) -> Result<Vec<Detection>, BackendError> {
        if self.looping && self.span > 0 && self.cursor >= self.span {
            self.cursor = 0;
        }
        let frame = self.first_frame + self.cursor;
        self.cursor += 1;
        Ok(self.frames.get(&frame).cloned().unwrap_or_default())
    }
}
