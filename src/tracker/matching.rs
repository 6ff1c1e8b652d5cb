//! Association of detections to predicted tracks.
//!
//! Cost is `1 - IoU` between a detection box and a track's predicted box,
//! optionally weighted by detection confidence, plus a fixed penalty when
//! class labels differ. The assignment is the global minimum-cost matching
//! (Jonker-Volgenant via `lapjv`); matched pairs costing more than the gate
//! are returned as unmatched on both sides.

use ndarray::Array2;

use crate::detection::Detection;
use crate::error::TrackerError;
use crate::tracker::rect::Rect;

/// Cost given to gated-out pairs and to padding cells of the square problem.
const INFEASIBLE_COST: f64 = 1e6;
/// Costs closer than this are treated as equal when resolving ties.
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationConfig {
    /// Pairs costing more than this are never matched.
    pub gate_cost: f32,
    /// Added to the cost of a pair whose class labels differ.
    pub class_mismatch_penalty: f32,
    /// Scale IoU similarity by detection confidence before inverting it.
    pub fuse_confidence: bool,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            gate_cost: 0.7,
            class_mismatch_penalty: 1000.0,
            fuse_confidence: false,
        }
    }
}

/// A live track as seen by the association step.
#[derive(Debug, Clone, Copy)]
pub struct PredictedTrack<'a> {
    pub bbox: Rect,
    pub class_label: &'a str,
}

/// Result of one association. Indices refer to the input slices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(detection index, track index)`, sorted by detection index.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<usize>,
}

/// Build the `detections x tracks` cost matrix.
pub fn cost_matrix(
    detections: &[Detection],
    tracks: &[PredictedTrack<'_>],
    config: &AssociationConfig,
) -> Array2<f64> {
    Array2::from_shape_fn((detections.len(), tracks.len()), |(i, j)| {
        let det = &detections[i];
        let track = &tracks[j];
        let mut similarity = det.bbox.iou(&track.bbox);
        if config.fuse_confidence {
            similarity *= det.confidence;
        }
        let mut cost = f64::from(1.0 - similarity);
        if det.class_label != track.class_label {
            cost += f64::from(config.class_mismatch_penalty);
        }
        cost
    })
}

/// Associate detections with predicted tracks.
pub fn associate(
    detections: &[Detection],
    tracks: &[PredictedTrack<'_>],
    config: &AssociationConfig,
) -> Result<Assignment, TrackerError> {
    let costs = cost_matrix(detections, tracks, config);
    linear_assignment(&costs, f64::from(config.gate_cost))
}

/// Minimum-cost matching over `cost_matrix` with pairs above `gate` rejected.
///
/// Among equal-cost matchings the result prefers lower detection indices,
/// then lower track indices.
pub fn linear_assignment(cost_matrix: &Array2<f64>, gate: f64) -> Result<Assignment, TrackerError> {
    let (num_dets, num_tracks) = cost_matrix.dim();

    if num_dets == 0 || num_tracks == 0 {
        return Ok(Assignment {
            matches: vec![],
            unmatched_detections: (0..num_dets).collect(),
            unmatched_tracks: (0..num_tracks).collect(),
        });
    }

    let infeasible = |reason: String| TrackerError::AssignmentInfeasible {
        detections: num_dets,
        tracks: num_tracks,
        reason,
    };
    let size = num_dets.max(num_tracks);

    let mut padded = Array2::<f64>::from_elem((size, size), INFEASIBLE_COST);
    for ((i, j), &cost) in cost_matrix.indexed_iter() {
        if is_admissible(cost, gate) {
            padded[[i, j]] = cost;
        }
    }

    let (row_to_col, _) = lapjv::lapjv(&padded).map_err(|e| infeasible(format!("{e:?}")))?;
    if row_to_col.len() != size {
        return Err(infeasible(format!(
            "solver returned {} rows for a {size}x{size} problem",
            row_to_col.len()
        )));
    }

    let mut column_taken = vec![false; size];
    let mut matches = Vec::new();
    for (det_idx, &track_idx) in row_to_col.iter().enumerate() {
        if track_idx >= size || column_taken[track_idx] {
            return Err(infeasible(format!(
                "column {track_idx} assigned twice or out of range"
            )));
        }
        column_taken[track_idx] = true;

        if det_idx < num_dets
            && track_idx < num_tracks
            && is_admissible(cost_matrix[[det_idx, track_idx]], gate)
        {
            matches.push((det_idx, track_idx));
        }
    }

    prefer_lower_indices(cost_matrix, gate, &mut matches);

    let mut det_matched = vec![false; num_dets];
    let mut track_matched = vec![false; num_tracks];
    for &(d, t) in &matches {
        det_matched[d] = true;
        track_matched[t] = true;
    }

    Ok(Assignment {
        matches,
        unmatched_detections: (0..num_dets).filter(|&d| !det_matched[d]).collect(),
        unmatched_tracks: (0..num_tracks).filter(|&t| !track_matched[t]).collect(),
    })
}

fn is_admissible(cost: f64, gate: f64) -> bool {
    cost.is_finite() && cost <= gate
}

/// Rewrite an optimal matching into the equal-cost one that uses the lowest
/// indices: move a pair onto a free lower track or detection when the cost
/// is the same, and uncross two pairs when the swap costs the same.
///
/// Every rewrite lowers the sum of matched indices or, for swaps, raises
/// `sum(i * j)` with the index sums fixed, so the loop terminates.
fn prefer_lower_indices(costs: &Array2<f64>, gate: f64, matches: &mut [(usize, usize)]) {
    let (num_dets, num_tracks) = costs.dim();
    let admissible = |i: usize, j: usize| is_admissible(costs[[i, j]], gate);
    let same = |a: f64, b: f64| (a - b).abs() <= TIE_TOLERANCE;

    loop {
        let mut changed = false;

        let mut det_used = vec![false; num_dets];
        let mut track_used = vec![false; num_tracks];
        for &(i, j) in matches.iter() {
            det_used[i] = true;
            track_used[j] = true;
        }

        for pair in matches.iter_mut() {
            let (i, j) = *pair;
            let cost = costs[[i, j]];
            if let Some(lower) =
                (0..i).find(|&k| !det_used[k] && admissible(k, j) && same(costs[[k, j]], cost))
            {
                det_used[i] = false;
                det_used[lower] = true;
                *pair = (lower, j);
                changed = true;
                continue;
            }
            if let Some(lower) =
                (0..j).find(|&k| !track_used[k] && admissible(i, k) && same(costs[[i, k]], cost))
            {
                track_used[j] = false;
                track_used[lower] = true;
                *pair = (i, lower);
                changed = true;
            }
        }

        for a in 0..matches.len() {
            for b in 0..matches.len() {
                let (i1, j1) = matches[a];
                let (i2, j2) = matches[b];
                if i1 < i2
                    && j1 > j2
                    && admissible(i1, j2)
                    && admissible(i2, j1)
                    && same(costs[[i1, j2]] + costs[[i2, j1]], costs[[i1, j1]] + costs[[i2, j2]])
                {
                    matches[a] = (i1, j2);
                    matches[b] = (i2, j1);
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }
    matches.sort_unstable();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionBuilder;
    use std::collections::HashSet;

    fn det(x: f32, y: f32, label: &str) -> Detection {
        DetectionBuilder::new()
            .tlwh(x, y, 20.0, 20.0)
            .class_label(label)
            .confidence(0.9)
            .build()
    }

    fn track(x: f32, y: f32, label: &str) -> PredictedTrack<'_> {
        PredictedTrack {
            bbox: Rect::new(x, y, 20.0, 20.0),
            class_label: label,
        }
    }

    fn assert_bijective(a: &Assignment, n: usize, m: usize) {
        let dets: HashSet<_> = a.matches.iter().map(|&(d, _)| d).collect();
        let tracks: HashSet<_> = a.matches.iter().map(|&(_, t)| t).collect();
        assert_eq!(dets.len(), a.matches.len());
        assert_eq!(tracks.len(), a.matches.len());
        assert_eq!(a.matches.len() + a.unmatched_detections.len(), n);
        assert_eq!(a.matches.len() + a.unmatched_tracks.len(), m);
        for d in &a.unmatched_detections {
            assert!(!dets.contains(d));
        }
        for t in &a.unmatched_tracks {
            assert!(!tracks.contains(t));
        }
    }

    #[test]
    fn test_matches_overlapping_pairs() {
        let dets = vec![det(100.0, 0.0, "berry"), det(0.0, 0.0, "berry")];
        let tracks = vec![track(1.0, 1.0, "berry"), track(101.0, 0.0, "berry")];
        let a = associate(&dets, &tracks, &AssociationConfig::default()).unwrap();
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
        assert!(a.unmatched_detections.is_empty());
        assert!(a.unmatched_tracks.is_empty());
    }

    #[test]
    fn test_global_optimum_beats_greedy() {
        // Greedy would give det 0 to track 0 (best single pair) and leave det 1 unmatched.
        let costs = ndarray::arr2(&[[0.1, 0.2], [0.3, 0.9]]);
        let a = linear_assignment(&costs, 0.5).unwrap();
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_gated_pairs_are_not_forced() {
        let dets = vec![det(0.0, 0.0, "berry")];
        let tracks = vec![track(500.0, 500.0, "berry")];
        let a = associate(&dets, &tracks, &AssociationConfig::default()).unwrap();
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_detections, vec![0]);
        assert_eq!(a.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_cross_class_never_matches() {
        let dets = vec![det(0.0, 0.0, "berry"), det(0.0, 0.0, "flower")];
        let tracks = vec![track(0.0, 0.0, "berry")];
        let a = associate(&dets, &tracks, &AssociationConfig::default()).unwrap();
        assert_eq!(a.matches, vec![(0, 0)]);
        assert_eq!(a.unmatched_detections, vec![1]);

        let only_flower = vec![det(0.0, 0.0, "flower")];
        let a = associate(&only_flower, &tracks, &AssociationConfig::default()).unwrap();
        assert!(a.matches.is_empty());
    }

    #[test]
    fn test_ties_prefer_lower_indices() {
        let costs = Array2::from_elem((3, 3), 0.5);
        let a = linear_assignment(&costs, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_ties_in_first_row_and_column() {
        let wide = Array2::from_elem((1, 3), 0.5);
        assert_eq!(linear_assignment(&wide, 0.7).unwrap().matches, vec![(0, 0)]);

        let tall = Array2::from_elem((3, 1), 0.5);
        let a = linear_assignment(&tall, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 0)]);
        assert_eq!(a.unmatched_detections, vec![1, 2]);
    }

    #[test]
    fn test_rectangular_ties_prefer_lower_indices() {
        let costs = Array2::from_elem((3, 2), 0.5);
        let a = linear_assignment(&costs, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 0), (1, 1)]);
        assert_eq!(a.unmatched_detections, vec![2]);

        let costs = Array2::from_elem((2, 4), 0.5);
        let a = linear_assignment(&costs, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 0), (1, 1)]);
        assert_eq!(a.unmatched_tracks, vec![2, 3]);
    }

    #[test]
    fn test_tie_skips_gated_column() {
        let costs = ndarray::arr2(&[[9.0, 0.5, 0.5], [9.0, 9.0, 9.0]]);
        let a = linear_assignment(&costs, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 1)]);
        assert_eq!(a.unmatched_detections, vec![1]);
        assert_eq!(a.unmatched_tracks, vec![0, 2]);
    }

    #[test]
    fn test_ties_do_not_override_cheaper_pairs() {
        let costs = ndarray::arr2(&[[0.5, 0.2], [0.5, 0.5]]);
        let a = linear_assignment(&costs, 0.7).unwrap();
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_rectangular_problems_are_bijective() {
        let costs = ndarray::arr2(&[[0.2, 0.9, 0.1], [0.4, 0.3, 0.8]]);
        let a = linear_assignment(&costs, 0.5).unwrap();
        assert_bijective(&a, 2, 3);
        assert_eq!(a.matches, vec![(0, 2), (1, 1)]);

        let tall = ndarray::arr2(&[[0.2], [0.1], [0.6]]);
        let a = linear_assignment(&tall, 0.5).unwrap();
        assert_bijective(&a, 3, 1);
        assert_eq!(a.matches, vec![(1, 0)]);
    }

    #[test]
    fn test_empty_inputs() {
        let a = associate(&[], &[track(0.0, 0.0, "berry")], &AssociationConfig::default()).unwrap();
        assert_eq!(a.unmatched_tracks, vec![0]);
        let a = associate(&[det(0.0, 0.0, "berry")], &[], &AssociationConfig::default()).unwrap();
        assert_eq!(a.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_fused_confidence_raises_cost() {
        let mut low = det(0.0, 0.0, "berry");
        low.confidence = 0.5;
        let tracks = vec![track(0.0, 0.0, "berry")];
        let config = AssociationConfig {
            fuse_confidence: true,
            ..Default::default()
        };
        let costs = cost_matrix(&[low], &tracks, &config);
        assert!((costs[[0, 0]] - 0.5).abs() < 1e-6);
    }
}
