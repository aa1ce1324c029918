use serde::{Deserialize, Serialize};

/// Label shown for a track (and stored for a session) until recognition succeeds.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Track identifier. Issued monotonically by the reconciler, never reused.
pub type TrackId = u64;

/// Axis-aligned bounding box for a detected person, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Center point of the box.
    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// True for zero/negative extents or non-finite coordinates.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Whether the point lies inside the box (left/top edges inclusive).
    pub fn contains(&self, point: Centroid) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// A point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance between two points.
    pub fn distance(&self, other: &Centroid) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Face encoding vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Lower = more similar. Mismatched lengths are never a match.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One detected person in the current frame.
///
/// Carries no identity. `encoding` is the face encoding computed upstream for
/// the region, if a face was found inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub encoding: Option<Embedding>,
}

impl Detection {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox, encoding: None }
    }

    pub fn with_encoding(bbox: BoundingBox, encoding: Embedding) -> Self {
        Self {
            bbox,
            encoding: Some(encoding),
        }
    }

    pub fn centroid(&self) -> Centroid {
        self.bbox.centroid()
    }
}

/// All detections observed in one frame.
#[derive(Debug, Clone)]
pub struct FrameDetections {
    /// Zero-based position in the stream.
    pub sequence: u64,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub detections: Vec<Detection>,
}

/// The reconciler's view of one physically continuous person.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: TrackId,
    /// Last box matched to this track.
    pub bbox: BoundingBox,
    pub last_centroid: Centroid,
    /// Consecutive frames without a matching detection.
    pub missed_frames: u32,
    /// Resolved name. Set at most once.
    pub name: Option<String>,
    /// Last area reported by the zone classifier.
    pub area: Option<String>,
}

impl Track {
    pub fn new(track_id: TrackId, bbox: BoundingBox) -> Self {
        Self {
            track_id,
            bbox,
            last_centroid: bbox.centroid(),
            missed_frames: 0,
            name: None,
            area: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    pub fn is_identified(&self) -> bool {
        self.name.as_deref().is_some_and(|n| n != UNKNOWN_NAME)
    }

    /// Whether a detection matched this track in the latest frame.
    pub fn is_visible(&self) -> bool {
        self.missed_frames == 0
    }
}

/// Track lifecycle event produced by the reconciler and consumed by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Ended { track_id: TrackId },
    Started { track_id: TrackId },
    Identified { track_id: TrackId, name: String },
    ZoneChanged { track_id: TrackId, area: String },
}

impl TrackEvent {
    pub fn track_id(&self) -> TrackId {
        match self {
            TrackEvent::Ended { track_id }
            | TrackEvent::Started { track_id }
            | TrackEvent::Identified { track_id, .. }
            | TrackEvent::ZoneChanged { track_id, .. } => *track_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackEvent::Ended { .. } => "ended",
            TrackEvent::Started { .. } => "started",
            TrackEvent::Identified { .. } => "identified",
            TrackEvent::ZoneChanged { .. } => "zone_changed",
        }
    }
}

/// Best roster match returned by a recognition oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub name: String,
    /// Encoding distance to the matched roster entry. Lower = closer.
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_of_box() {
        let c = BoundingBox::new(10.0, 10.0, 50.0, 100.0).centroid();
        assert!((c.x - 35.0).abs() < 1e-6);
        assert!((c.y - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_distance() {
        let a = Centroid::new(0.0, 0.0);
        let b = Centroid::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_boxes() {
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 10.0).is_degenerate());
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 0.0).is_degenerate());
        assert!(BoundingBox::new(0.0, 0.0, -5.0, 10.0).is_degenerate());
        assert!(BoundingBox::new(f32::NAN, 0.0, 5.0, 10.0).is_degenerate());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_degenerate());
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_contains_edges() {
        let zone = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(zone.contains(Centroid::new(0.0, 0.0)));
        assert!(!zone.contains(Centroid::new(10.0, 5.0)));
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).is_infinite());
    }

    #[test]
    fn test_track_display_name_defaults_to_unknown() {
        let track = Track::new(1, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(track.display_name(), UNKNOWN_NAME);
        assert!(!track.is_identified());
    }

    #[test]
    fn test_explicit_unknown_name_is_unresolved() {
        let mut track = Track::new(1, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        track.name = Some(UNKNOWN_NAME.to_string());
        assert!(!track.is_identified());
        track.name = Some("Jane".to_string());
        assert!(track.is_identified());
        assert_eq!(track.display_name(), "Jane");
    }
}
