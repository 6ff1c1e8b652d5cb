//! A single tracked object and its exclusively owned filter.

use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::tracker::kalman_filter::{FilterError, KalmanFilter, NoiseModel};
use crate::tracker::rect::Rect;
use crate::tracker::track_status::TrackStatus;

#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub class_label: String,
    pub status: TrackStatus,
    /// Cycles since birth, counting the birth cycle.
    pub age: u32,
    /// Cycles since the last matched detection.
    pub time_since_update: u32,
    /// Total matched detections, counting the one that created the track.
    pub hit_count: u32,
    /// Matched detections in a row; reset by a miss.
    pub hit_streak: u32,
    /// Running mean of matched detection confidences.
    pub confidence: f32,
    /// Last detection box, used for the box's aspect when the filter is unavailable.
    last_bbox: Rect,
    filter: KalmanFilter,
}

impl Track {
    pub fn new(track_id: u64, detection: &Detection, noise: NoiseModel) -> Self {
        Self {
            track_id,
            class_label: detection.class_label.clone(),
            status: TrackStatus::Tentative,
            age: 1,
            time_since_update: 0,
            hit_count: 1,
            hit_streak: 1,
            confidence: detection.confidence,
            last_bbox: detection.bbox,
            filter: KalmanFilter::initiate(detection.bbox.to_xyah_f64(), noise),
        }
    }

    /// The track's motion filter.
    pub fn filter(&self) -> &KalmanFilter {
        &self.filter
    }

    /// Box at the filter's current estimate.
    pub fn rect(&self) -> Rect {
        let [cx, cy, a, h] = self.filter.measurement_estimate();
        let rect = Rect::from_xyah(cx as f32, cy as f32, a as f32, h as f32);
        if rect.is_finite() { rect } else { self.last_bbox }
    }

    /// Advance the filter by `dt` seconds. Matched or not, the predicted
    /// state is kept as is.
    pub fn predict(&mut self, dt: f64) {
        self.filter.predict(dt);
        self.age += 1;
    }

    /// Fold a matched detection into the state and hit counters.
    pub fn update(&mut self, detection: &Detection) -> Result<(), FilterError> {
        self.filter.update(detection.bbox.to_xyah_f64())?;
        self.last_bbox = detection.bbox;
        self.hit_count += 1;
        self.hit_streak += 1;
        self.time_since_update = 0;
        self.confidence += (detection.confidence - self.confidence) / self.hit_count as f32;
        self.confidence = self.confidence.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn mark_missed(&mut self) {
        self.time_since_update += 1;
        self.hit_streak = 0;
    }

    pub fn to_object(&self) -> TrackedObject {
        let [x, y] = self.filter.position();
        let [vx, vy] = self.filter.velocity();
        TrackedObject {
            track_id: self.track_id,
            class_label: self.class_label.clone(),
            status: self.status,
            bbox: self.rect(),
            position: [x as f32, y as f32],
            velocity: [vx as f32, vy as f32],
            age: self.age,
            time_since_update: self.time_since_update,
            hit_count: self.hit_count,
            confidence_estimate: self.confidence,
        }
    }
}

/// Published snapshot of a track after a completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub class_label: String,
    pub status: TrackStatus,
    pub bbox: Rect,
    /// Box center in pixels.
    pub position: [f32; 2],
    /// Pixels per second.
    pub velocity: [f32; 2],
    pub age: u32,
    pub time_since_update: u32,
    pub hit_count: u32,
    pub confidence_estimate: f32,
}
