//! Track lifecycle and the per-frame tracking cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::detection::Detection;
use crate::error::TrackerError;
use crate::tracker::kalman_filter::NoiseModel;
use crate::tracker::matching::{self, AssociationConfig, PredictedTrack};
use crate::tracker::track::{Track, TrackedObject};
use crate::tracker::track_status::TrackStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive matches a tentative track needs to become confirmed.
    pub min_hits: u32,
    /// Misses a tentative track survives before it is deleted.
    pub max_tentative_misses: u32,
    /// Consecutive misses a confirmed track may coast through.
    pub max_coast: u32,
    /// Association cost above which a pair is never matched.
    pub gate_cost: f32,
    pub class_mismatch_penalty: f32,
    pub fuse_confidence: bool,
    /// Detections below this confidence are ignored.
    pub min_confidence: f32,
    /// Nominal camera rate; also the fallback step when stamps are unusable.
    pub frame_rate: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_hits: 3,
            max_tentative_misses: 1,
            max_coast: 3,
            gate_cost: 0.7,
            class_mismatch_penalty: 1000.0,
            fuse_confidence: false,
            min_confidence: 0.1,
            frame_rate: 30.0,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.min_hits == 0 {
            return Err(TrackerError::InvalidConfig("min_hits must be at least 1".into()));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !(self.gate_cost.is_finite() && self.gate_cost >= 0.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "gate_cost must be a non-negative number, got {}",
                self.gate_cost
            )));
        }
        if self.class_mismatch_penalty <= self.gate_cost {
            return Err(TrackerError::InvalidConfig(
                "class_mismatch_penalty must exceed gate_cost".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(TrackerError::InvalidConfig(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }

    pub fn association(&self) -> AssociationConfig {
        AssociationConfig {
            gate_cost: self.gate_cost,
            class_mismatch_penalty: self.class_mismatch_penalty,
            fuse_confidence: self.fuse_confidence,
        }
    }

    pub fn noise(&self) -> NoiseModel {
        NoiseModel {
            frame_rate: self.frame_rate,
            ..NoiseModel::default()
        }
    }
}

/// Everything one cycle publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleOutput {
    pub frame_id: u64,
    pub stamp: f64,
    /// Live tracks after the cycle, ordered by track id.
    pub objects: Vec<TrackedObject>,
    /// Tracks that reached `Deleted` this cycle and were pruned.
    pub deleted: Vec<TrackedObject>,
}

impl CycleOutput {
    pub fn confirmed(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects
            .iter()
            .filter(|o| o.status == TrackStatus::Confirmed)
    }

    pub fn find(&self, track_id: u64) -> Option<&TrackedObject> {
        self.objects
            .iter()
            .chain(self.deleted.iter())
            .find(|o| o.track_id == track_id)
    }
}

/// Owns the live tracks of one scene.
///
/// Not shareable between threads while a cycle runs; run one manager per
/// camera and publish the returned [`CycleOutput`] snapshots.
#[derive(Debug)]
pub struct TrackManager {
    config: TrackerConfig,
    association: AssociationConfig,
    noise: NoiseModel,
    tracks: Vec<Track>,
    next_id: u64,
    last_stamp: Option<f64>,
}

impl TrackManager {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self {
            association: config.association(),
            noise: config.noise(),
            config,
            tracks: Vec::new(),
            next_id: 1,
            last_stamp: None,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn snapshot(&self) -> Vec<TrackedObject> {
        self.tracks.iter().map(Track::to_object).collect()
    }

    fn elapsed(&mut self, stamp: f64) -> f64 {
        let nominal = 1.0 / self.config.frame_rate;
        let dt = match self.last_stamp {
            Some(last) if stamp.is_finite() && stamp > last => stamp - last,
            Some(last) => {
                warn!(stamp, last, "non-increasing frame stamp, assuming nominal frame interval");
                nominal
            }
            None => nominal,
        };
        if stamp.is_finite() && self.last_stamp.is_none_or(|last| stamp > last) {
            self.last_stamp = Some(stamp);
        }
        dt
    }

    /// Run one tracking cycle on the detections of one frame.
    ///
    /// Steps run in a fixed order: predict every track, associate against the
    /// predictions, update matched tracks, advance every lifecycle, spawn
    /// tracks from unmatched detections, prune deleted tracks.
    pub fn step(
        &mut self,
        frame_id: u64,
        stamp: f64,
        detections: &[Detection],
    ) -> Result<CycleOutput, TrackerError> {
        let dt = self.elapsed(stamp);

        let detections: Vec<Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence && d.bbox.is_finite())
            .cloned()
            .collect();

        // 1. Predict.
        for track in &mut self.tracks {
            track.predict(dt);
        }

        // 2. Associate.
        let assignment = {
            let predicted: Vec<PredictedTrack<'_>> = self
                .tracks
                .iter()
                .map(|t| PredictedTrack {
                    bbox: t.rect(),
                    class_label: &t.class_label,
                })
                .collect();
            matching::associate(&detections, &predicted, &self.association)?
        };

        // 3. Update.
        let mut matched = vec![false; self.tracks.len()];
        let mut unmatched_detections = assignment.unmatched_detections;
        for &(det_idx, track_idx) in &assignment.matches {
            let track = &mut self.tracks[track_idx];
            match track.update(&detections[det_idx]) {
                Ok(()) => matched[track_idx] = true,
                Err(e) => {
                    warn!(track_id = track.track_id, error = %e, "filter update failed, treating as miss");
                    unmatched_detections.push(det_idx);
                }
            }
        }

        // 4. Lifecycle.
        for (track, &hit) in self.tracks.iter_mut().zip(&matched) {
            if hit {
                advance_matched(&self.config, track);
            } else {
                track.mark_missed();
                advance_missed(&self.config, track);
            }
        }

        // 5. Spawn.
        unmatched_detections.sort_unstable();
        for det_idx in unmatched_detections {
            let det = &detections[det_idx];
            if det.bbox.width <= 0.0 || det.bbox.height <= 0.0 {
                continue;
            }
            let mut track = Track::new(self.next_id, det, self.noise);
            self.next_id += 1;
            if track.hit_streak >= self.config.min_hits {
                track.status = TrackStatus::Confirmed;
            }
            debug!(track_id = track.track_id, class = %track.class_label, "track born");
            self.tracks.push(track);
        }

        // 6. Prune.
        let mut deleted = Vec::new();
        self.tracks.retain(|t| {
            if t.status.is_live() {
                true
            } else {
                deleted.push(t.to_object());
                false
            }
        });

        Ok(CycleOutput {
            frame_id,
            stamp,
            objects: self.snapshot(),
            deleted,
        })
    }
}

fn advance_matched(config: &TrackerConfig, track: &mut Track) {
    match track.status {
        TrackStatus::Tentative if track.hit_streak >= config.min_hits => {
            track.status = TrackStatus::Confirmed;
            debug!(track_id = track.track_id, "track confirmed");
        }
        TrackStatus::Coasting => {
            track.status = TrackStatus::Confirmed;
            debug!(track_id = track.track_id, "track recovered from coasting");
        }
        _ => {}
    }
}

fn advance_missed(config: &TrackerConfig, track: &mut Track) {
    let next = match track.status {
        TrackStatus::Tentative if track.time_since_update > config.max_tentative_misses => {
            TrackStatus::Deleted
        }
        TrackStatus::Confirmed | TrackStatus::Coasting
            if track.time_since_update > config.max_coast =>
        {
            TrackStatus::Deleted
        }
        TrackStatus::Confirmed => TrackStatus::Coasting,
        status => status,
    };
    if next == TrackStatus::Deleted {
        debug!(
            track_id = track.track_id,
            misses = track.time_since_update,
            "track deleted"
        );
    }
    track.status = next;
}
