//! Detection sources: pull-based per-frame person detections.
//!
//! The replay format is JSON Lines, one frame per line:
//!
//! ```json
//! {"captured_at": "2026-01-01T08:00:00Z", "boxes": [{"x": 10, "y": 10, "width": 50, "height": 100, "encoding": [0.1, ...]}]}
//! ```
//!
//! `captured_at` and `encoding` are optional. Blank lines are skipped.

use crate::types::{BoundingBox, Detection, Embedding, FrameDetections};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::BufRead;
use thiserror::Error;

/// Overlap threshold used for non-maximum suppression of replayed boxes.
pub const DEFAULT_NMS_OVERLAP: f32 = 0.65;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("detection source I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Yields one frame of detections per call. `Ok(None)` marks end of stream.
pub trait DetectionSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ReplayBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    #[serde(default)]
    encoding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    boxes: Vec<ReplayBox>,
}

/// Replays detections recorded as JSON Lines.
pub struct ReplaySource<R> {
    reader: R,
    line: usize,
    sequence: u64,
    /// IoU above which the lower-ranked of two boxes is dropped. `None` disables.
    nms_overlap: Option<f32>,
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            sequence: 0,
            nms_overlap: Some(DEFAULT_NMS_OVERLAP),
        }
    }

    pub fn with_nms_overlap(mut self, overlap: Option<f32>) -> Self {
        self.nms_overlap = overlap;
        self
    }
}

impl ReplaySource<std::io::BufReader<std::fs::File>> {
    pub fn open(path: &std::path::Path) -> Result<Self, SourceError> {
        let file = std::fs::File::open(path)?;
        tracing::info!(path = %path.display(), "opened detection replay");
        Ok(Self::new(std::io::BufReader::new(file)))
    }
}

impl<R: BufRead> DetectionSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, SourceError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            if !buf.trim().is_empty() {
                break;
            }
        }

        let frame: ReplayFrame = serde_json::from_str(buf.trim()).map_err(|source| {
            SourceError::Malformed {
                line: self.line,
                source,
            }
        })?;

        let detections: Vec<Detection> = frame
            .boxes
            .into_iter()
            .map(|b| Detection {
                bbox: BoundingBox::new(b.x, b.y, b.width, b.height),
                encoding: b.encoding.map(Embedding::new),
            })
            .collect();

        let detections = match self.nms_overlap {
            Some(overlap) => nms(detections, overlap),
            None => detections,
        };

        let sequence = self.sequence;
        self.sequence += 1;

        Ok(Some(FrameDetections {
            sequence,
            captured_at: frame.captured_at.unwrap_or_else(Utc::now),
            detections,
        }))
    }
}

/// In-memory source yielding a fixed list of frames.
pub struct ScriptedSource {
    frames: VecDeque<Vec<Detection>>,
    sequence: u64,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames: frames.into(),
            sequence: 0,
        }
    }
}

impl DetectionSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<FrameDetections>, SourceError> {
        let Some(detections) = self.frames.pop_front() else {
            return Ok(None);
        };
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(Some(FrameDetections {
            sequence,
            captured_at: Utc::now(),
            detections,
        }))
    }
}

/// Non-maximum suppression: drop boxes overlapping an earlier-kept box.
///
/// Boxes carry no detector score here, so larger boxes rank first.
/// Surviving boxes keep their original relative order.
pub fn nms(detections: Vec<Detection>, overlap: f32) -> Vec<Detection> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| {
        detections[b]
            .bbox
            .area()
            .partial_cmp(&detections[a].bbox.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        for &j in &order[rank + 1..] {
            if !suppressed[j] && detections[i].bbox.iou(&detections[j].bbox) > overlap {
                suppressed[j] = true;
            }
        }
    }

    detections
        .into_iter()
        .zip(suppressed)
        .filter_map(|(d, s)| (!s).then_some(d))
        .collect()
}
