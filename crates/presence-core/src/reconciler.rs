//! Track reconciler: keeps a stable identity for each person across frames.
//!
//! Each frame, current detections are matched to previously active tracks by
//! greedy nearest-centroid assignment:
//!   1. distances for every (track, detection) pair within `max_match_distance`
//!   2. repeatedly confirm the globally smallest remaining pair
//!   3. ties go to the earlier detection, then the earlier track
//!
//! Unmatched detections open new tracks. Unmatched tracks coast on their last
//! position until `missed_frames` exceeds the eviction threshold.
//!
//! Events come out in a fixed order per frame: all `Ended`, then `Started`,
//! then `Identified`, then `ZoneChanged`. The ledger relies on this to name a
//! session only after it has been opened.

use crate::oracle::{self, RecognitionOracle};
use crate::types::{Detection, FrameDetections, Track, TrackEvent, TrackId};
use crate::zone::ZoneClassifier;

/// Tuning for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Largest centroid distance (pixels) still treated as the same person.
    pub max_match_distance: f32,
    /// Consecutive missed frames a track survives. Zero evicts on the first miss.
    pub eviction_threshold: u32,
    /// Oracle distance strictly below which a name is accepted.
    pub accept_distance: f32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 75.0,
            eviction_threshold: 1,
            accept_distance: 0.6,
        }
    }
}

/// Result of reconciling one frame.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub tracks: Vec<Track>,
    pub events: Vec<TrackEvent>,
    /// Detections dropped for degenerate geometry.
    pub dropped: usize,
}

impl Reconciliation {
    /// `(box, label)` pairs for tracks observed in this frame.
    pub fn labels(&self) -> Vec<(crate::types::BoundingBox, &str)> {
        self.tracks
            .iter()
            .filter(|t| t.is_visible())
            .map(|t| (t.bbox, t.display_name()))
            .collect()
    }
}

/// Matches per-frame detections to tracks and derives lifecycle events.
pub struct Reconciler {
    config: ReconcilerConfig,
    next_id: TrackId,
    oracle: Box<dyn RecognitionOracle + Send>,
    zones: Option<Box<dyn ZoneClassifier + Send>>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, oracle: Box<dyn RecognitionOracle + Send>) -> Self {
        Self {
            config,
            next_id: 1,
            oracle,
            zones: None,
        }
    }

    /// Attach a zone classifier; enables `ZoneChanged` events.
    pub fn with_zones(mut self, zones: Box<dyn ZoneClassifier + Send>) -> Self {
        self.zones = Some(zones);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Id the next new track will receive.
    pub fn next_track_id(&self) -> TrackId {
        self.next_id
    }

    /// Reconcile the tracks active at the end of the previous frame with the
    /// detections of the current frame.
    pub fn reconcile(&mut self, previous: Vec<Track>, frame: FrameDetections) -> Reconciliation {
        let FrameDetections {
            sequence,
            detections,
            ..
        } = frame;

        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| {
                let bad = d.bbox.is_degenerate();
                if bad {
                    tracing::warn!(
                        frame = sequence,
                        x = d.bbox.x,
                        y = d.bbox.y,
                        width = d.bbox.width,
                        height = d.bbox.height,
                        "dropping detection with degenerate geometry"
                    );
                }
                !bad
            })
            .collect();
        let dropped = total - detections.len();

        // Ids are never reused, even for callers handing in arbitrary tracks.
        if let Some(max_prev) = previous.iter().map(|t| t.track_id).max() {
            self.next_id = self.next_id.max(max_prev.saturating_add(1));
        }

        let assignment = self.assign(&previous, &detections);
        let mut detection_taken = vec![false; detections.len()];

        let mut ended = Vec::new();
        let mut started = Vec::new();
        // Surviving tracks, paired with the detection observed for them this frame.
        let mut active: Vec<(Track, Option<usize>)> = Vec::with_capacity(previous.len());

        for (mut track, matched) in previous.into_iter().zip(assignment) {
            match matched {
                Some(di) => {
                    detection_taken[di] = true;
                    track.bbox = detections[di].bbox;
                    track.last_centroid = detections[di].centroid();
                    track.missed_frames = 0;
                    active.push((track, Some(di)));
                }
                None => {
                    track.missed_frames += 1;
                    if track.missed_frames > self.config.eviction_threshold {
                        tracing::debug!(
                            frame = sequence,
                            track_id = track.track_id,
                            missed = track.missed_frames,
                            "track evicted"
                        );
                        ended.push(TrackEvent::Ended {
                            track_id: track.track_id,
                        });
                    } else {
                        tracing::debug!(
                            frame = sequence,
                            track_id = track.track_id,
                            missed = track.missed_frames,
                            "track coasting"
                        );
                        active.push((track, None));
                    }
                }
            }
        }

        for (di, detection) in detections.iter().enumerate() {
            if detection_taken[di] {
                continue;
            }
            let track_id = self.next_id;
            self.next_id = self.next_id.saturating_add(1);
            tracing::debug!(frame = sequence, track_id, "track started");
            started.push(TrackEvent::Started { track_id });
            active.push((Track::new(track_id, detection.bbox), Some(di)));
        }

        let mut identified = Vec::new();
        let mut zone_changes = Vec::new();

        for (track, observed) in active.iter_mut() {
            let Some(di) = *observed else {
                continue;
            };

            if !track.is_identified() {
                if let Some(name) = self.identify(track.track_id, &detections[di], sequence) {
                    track.name = Some(name.clone());
                    identified.push(TrackEvent::Identified {
                        track_id: track.track_id,
                        name,
                    });
                }
            }

            if let Some(zones) = &self.zones {
                match zones.classify(track.last_centroid) {
                    Some(area) if track.area.as_deref() != Some(area) => {
                        tracing::debug!(frame = sequence, track_id = track.track_id, area, "zone changed");
                        track.area = Some(area.to_string());
                        zone_changes.push(TrackEvent::ZoneChanged {
                            track_id: track.track_id,
                            area: area.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => track.area = None,
                }
            }
        }

        let mut events = ended;
        events.extend(started);
        events.extend(identified);
        events.extend(zone_changes);

        Reconciliation {
            tracks: active.into_iter().map(|(t, _)| t).collect(),
            events,
            dropped,
        }
    }

    /// Greedy nearest-centroid assignment. Returns, per previous track, the
    /// index of its matched detection.
    fn assign(&self, tracks: &[Track], detections: &[Detection]) -> Vec<Option<usize>> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in tracks.iter().enumerate() {
            for (di, detection) in detections.iter().enumerate() {
                let dist = track.last_centroid.distance(&detection.centroid());
                if dist <= self.config.max_match_distance {
                    pairs.push((dist, di, ti));
                }
            }
        }

        pairs.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assignment = vec![None; tracks.len()];
        let mut detection_used = vec![false; detections.len()];
        for (_, di, ti) in pairs {
            if assignment[ti].is_some() || detection_used[di] {
                continue;
            }
            assignment[ti] = Some(di);
            detection_used[di] = true;
        }
        assignment
    }

    /// Ask the oracle about a region; return the name if it is accepted.
    fn identify(&mut self, track_id: TrackId, region: &Detection, sequence: u64) -> Option<String> {
        let recognition = self.oracle.recognize(region)?;
        if oracle::accepts(&recognition, self.config.accept_distance) {
            tracing::info!(
                frame = sequence,
                track_id,
                name = %recognition.name,
                distance = recognition.distance,
                "track identified"
            );
            Some(recognition.name)
        } else {
            tracing::debug!(
                frame = sequence,
                track_id,
                candidate = %recognition.name,
                distance = recognition.distance,
                "recognition below acceptance"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NullOracle;
    use crate::types::{BoundingBox, Centroid, Recognition};
    use crate::zone::{Zone, ZoneMap};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Box of size 10x10 centred on (cx, cy).
    fn det_at(cx: f32, cy: f32) -> Detection {
        Detection::new(BoundingBox::new(cx - 5.0, cy - 5.0, 10.0, 10.0))
    }

    fn track_at(id: TrackId, cx: f32, cy: f32) -> Track {
        Track::new(id, BoundingBox::new(cx - 5.0, cy - 5.0, 10.0, 10.0))
    }

    fn frame(seq: u64, detections: Vec<Detection>) -> FrameDetections {
        FrameDetections {
            sequence: seq,
            captured_at: Utc::now(),
            detections,
        }
    }

    fn reconciler(max_match_distance: f32, eviction_threshold: u32) -> Reconciler {
        Reconciler::new(
            ReconcilerConfig {
                max_match_distance,
                eviction_threshold,
                accept_distance: 0.6,
            },
            Box::new(NullOracle),
        )
    }

    /// Oracle answering from a script, one entry per call; counts calls.
    struct ScriptOracle {
        answers: Vec<Option<Recognition>>,
        calls: Arc<AtomicUsize>,
    }

    impl RecognitionOracle for ScriptOracle {
        fn recognize(&mut self, _region: &Detection) -> Option<Recognition> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.get(n).cloned().flatten()
        }
    }

    fn named(name: &str, distance: f32) -> Option<Recognition> {
        Some(Recognition {
            name: name.into(),
            distance,
        })
    }

    #[test]
    fn test_matches_nearest_track() {
        let mut r = reconciler(10.0, 0);
        let previous = vec![track_at(1, 0.0, 0.0), track_at(2, 100.0, 100.0)];
        let out = r.reconcile(previous, frame(0, vec![det_at(2.0, 1.0)]));

        let t1 = out.tracks.iter().find(|t| t.track_id == 1).unwrap();
        assert_eq!(t1.last_centroid, Centroid::new(2.0, 1.0));
        assert_eq!(t1.missed_frames, 0);
        // Track 2 had no match and threshold 0 evicts immediately.
        assert_eq!(out.events, vec![TrackEvent::Ended { track_id: 2 }]);
        assert_eq!(out.tracks.len(), 1);
    }

    #[test]
    fn test_greedy_picks_global_minimum_first() {
        let mut r = reconciler(20.0, 1);
        let previous = vec![track_at(1, 0.0, 0.0), track_at(2, 10.0, 0.0)];
        // d0 is 6 from track 1 and 4 from track 2; d1 is 1 from track 1.
        let out = r.reconcile(previous, frame(0, vec![det_at(6.0, 0.0), det_at(-1.0, 0.0)]));

        let t1 = out.tracks.iter().find(|t| t.track_id == 1).unwrap();
        let t2 = out.tracks.iter().find(|t| t.track_id == 2).unwrap();
        assert_eq!(t1.last_centroid, Centroid::new(-1.0, 0.0));
        assert_eq!(t2.last_centroid, Centroid::new(6.0, 0.0));
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_tie_goes_to_earlier_detection() {
        let mut r = reconciler(10.0, 1);
        let out = r.reconcile(
            vec![track_at(1, 0.0, 0.0)],
            frame(0, vec![det_at(5.0, 0.0), det_at(-5.0, 0.0)]),
        );

        let t1 = out.tracks.iter().find(|t| t.track_id == 1).unwrap();
        assert_eq!(t1.last_centroid, Centroid::new(5.0, 0.0));
        assert_eq!(out.events, vec![TrackEvent::Started { track_id: 2 }]);
    }

    #[test]
    fn test_match_distance_is_inclusive() {
        let mut r = reconciler(10.0, 0);
        let out = r.reconcile(vec![track_at(1, 0.0, 0.0)], frame(0, vec![det_at(6.0, 8.0)]));
        assert!(out.events.is_empty());
        assert_eq!(out.tracks[0].track_id, 1);
    }

    #[test]
    fn test_far_detection_starts_new_track() {
        let mut r = reconciler(10.0, 0);
        let out = r.reconcile(vec![track_at(1, 0.0, 0.0)], frame(0, vec![det_at(50.0, 0.0)]));
        assert_eq!(
            out.events,
            vec![
                TrackEvent::Ended { track_id: 1 },
                TrackEvent::Started { track_id: 2 },
            ]
        );
    }

    #[test]
    fn test_ids_are_fresh_and_never_reused() {
        let mut r = reconciler(10.0, 0);
        // Caller-supplied tracks with ids the reconciler never issued.
        let previous = vec![track_at(41, 0.0, 0.0), track_at(7, 500.0, 500.0)];
        let out = r.reconcile(previous.clone(), frame(0, vec![det_at(0.0, 0.0), det_at(250.0, 250.0)]));

        let max_prev = previous.iter().map(|t| t.track_id).max().unwrap();
        for track in &out.tracks {
            let continued = previous.iter().any(|p| p.track_id == track.track_id);
            assert!(continued || track.track_id > max_prev);
        }

        // Everything ends, then new people appear: ids keep climbing.
        let out = r.reconcile(out.tracks, frame(1, vec![]));
        assert!(out.tracks.is_empty());
        let out = r.reconcile(out.tracks, frame(2, vec![det_at(0.0, 0.0)]));
        assert_eq!(out.tracks[0].track_id, 43);
    }

    #[test]
    fn test_largest_track_id_does_not_overflow() {
        let mut r = reconciler(10.0, 1);
        let out = r.reconcile(
            vec![track_at(u64::MAX, 0.0, 0.0)],
            frame(0, vec![det_at(1.0, 0.0)]),
        );
        assert!(out.events.is_empty());
        assert_eq!(out.tracks[0].track_id, u64::MAX);
        assert_eq!(r.next_track_id(), u64::MAX);
    }

    #[test]
    fn test_grace_period_survives_one_miss() {
        let mut r = reconciler(10.0, 1);
        let out = r.reconcile(vec![], frame(0, vec![det_at(0.0, 0.0)]));
        assert_eq!(out.events, vec![TrackEvent::Started { track_id: 1 }]);

        let out = r.reconcile(out.tracks, frame(1, vec![]));
        assert!(out.events.is_empty());
        assert_eq!(out.tracks.len(), 1);
        assert_eq!(out.tracks[0].missed_frames, 1);
        assert!(!out.tracks[0].is_visible());

        let out = r.reconcile(out.tracks, frame(2, vec![]));
        assert_eq!(out.events, vec![TrackEvent::Ended { track_id: 1 }]);
        assert!(out.tracks.is_empty());

        let out = r.reconcile(out.tracks, frame(3, vec![]));
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_coasting_track_is_recovered_at_last_position() {
        let mut r = reconciler(10.0, 1);
        let out = r.reconcile(vec![], frame(0, vec![det_at(0.0, 0.0)]));
        let out = r.reconcile(out.tracks, frame(1, vec![]));
        let out = r.reconcile(out.tracks, frame(2, vec![det_at(3.0, 0.0)]));
        assert!(out.events.is_empty());
        assert_eq!(out.tracks[0].track_id, 1);
        assert_eq!(out.tracks[0].missed_frames, 0);
    }

    #[test]
    fn test_degenerate_detections_are_dropped() {
        let mut r = reconciler(10.0, 1);
        let zero_width = Detection::new(BoundingBox::new(0.0, 0.0, 0.0, 10.0));
        let zero_height = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 0.0));
        let out = r.reconcile(vec![], frame(0, vec![zero_width, det_at(50.0, 50.0), zero_height]));
        assert_eq!(out.dropped, 2);
        assert_eq!(out.tracks.len(), 1);
        assert_eq!(out.events, vec![TrackEvent::Started { track_id: 1 }]);
    }

    #[test]
    fn test_identification_follows_start_in_same_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptOracle {
            answers: vec![named("Jane", 0.3)],
            calls: calls.clone(),
        };
        let mut r = Reconciler::new(
            ReconcilerConfig {
                eviction_threshold: 0,
                ..ReconcilerConfig::default()
            },
            Box::new(oracle),
        );

        let out = r.reconcile(vec![track_at(9, 500.0, 500.0)], frame(0, vec![det_at(0.0, 0.0)]));
        assert_eq!(
            out.events,
            vec![
                TrackEvent::Ended { track_id: 9 },
                TrackEvent::Started { track_id: 10 },
                TrackEvent::Identified {
                    track_id: 10,
                    name: "Jane".into()
                },
            ]
        );
        assert_eq!(out.tracks[0].display_name(), "Jane");
    }

    #[test]
    fn test_name_is_monotonic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptOracle {
            answers: vec![None, named("Jane", 0.4), named("Bob", 0.1), None],
            calls: calls.clone(),
        };
        let mut r = Reconciler::new(ReconcilerConfig::default(), Box::new(oracle));

        let out = r.reconcile(vec![], frame(0, vec![det_at(0.0, 0.0)]));
        assert_eq!(out.tracks[0].display_name(), "Unknown");

        let out = r.reconcile(out.tracks, frame(1, vec![det_at(1.0, 0.0)]));
        assert_eq!(
            out.events,
            vec![TrackEvent::Identified {
                track_id: 1,
                name: "Jane".into()
            }]
        );

        let out = r.reconcile(out.tracks, frame(2, vec![det_at(2.0, 0.0)]));
        assert!(out.events.is_empty());
        assert_eq!(out.tracks[0].display_name(), "Jane");

        // Resolved tracks are not sent to the oracle again.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_weak_match_does_not_name_track() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptOracle {
            answers: vec![named("Jane", 0.75)],
            calls,
        };
        let mut r = Reconciler::new(ReconcilerConfig::default(), Box::new(oracle));
        let out = r.reconcile(vec![], frame(0, vec![det_at(0.0, 0.0)]));
        assert_eq!(out.events, vec![TrackEvent::Started { track_id: 1 }]);
        assert!(!out.tracks[0].is_identified());
    }

    #[test]
    fn test_coasting_track_is_not_sent_to_oracle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptOracle {
            answers: vec![],
            calls: calls.clone(),
        };
        let mut r = Reconciler::new(ReconcilerConfig::default(), Box::new(oracle));
        let out = r.reconcile(vec![], frame(0, vec![det_at(0.0, 0.0)]));
        let _ = r.reconcile(out.tracks, frame(1, vec![]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zone_changes_follow_other_events() {
        let zones = ZoneMap::new(vec![
            Zone { name: "door".into(), x: 0.0, y: 0.0, width: 50.0, height: 50.0 },
            Zone { name: "sofa".into(), x: 50.0, y: 0.0, width: 50.0, height: 50.0 },
        ])
        .unwrap();
        let mut r = reconciler(40.0, 1).with_zones(Box::new(zones));

        let out = r.reconcile(vec![], frame(0, vec![det_at(10.0, 10.0)]));
        assert_eq!(
            out.events,
            vec![
                TrackEvent::Started { track_id: 1 },
                TrackEvent::ZoneChanged { track_id: 1, area: "door".into() },
            ]
        );

        let out = r.reconcile(out.tracks, frame(1, vec![det_at(20.0, 10.0)]));
        assert!(out.events.is_empty());

        let out = r.reconcile(out.tracks, frame(2, vec![det_at(55.0, 10.0)]));
        assert_eq!(
            out.events,
            vec![TrackEvent::ZoneChanged { track_id: 1, area: "sofa".into() }]
        );
    }

    #[test]
    fn test_labels_only_cover_visible_tracks() {
        let mut r = reconciler(10.0, 1);
        let out = r.reconcile(vec![track_at(1, 0.0, 0.0)], frame(0, vec![det_at(100.0, 100.0)]));
        let labels = out.labels();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].1, "Unknown");
        assert!((labels[0].0.x - 95.0).abs() < 1e-6);
    }
}
