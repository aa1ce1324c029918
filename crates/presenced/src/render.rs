//! Frame sinks — consumers of per-frame `(box, label)` annotations.

use presence_core::BoundingBox;

/// Receives the labelled boxes for each processed frame. Pure sink.
pub trait FrameSink {
    fn render(&mut self, sequence: u64, labels: &[(BoundingBox, &str)]);
}

/// Writes annotations to the trace log at debug level.
pub struct LogRenderer;

impl FrameSink for LogRenderer {
    fn render(&mut self, sequence: u64, labels: &[(BoundingBox, &str)]) {
        for (bbox, label) in labels {
            tracing::debug!(
                frame = sequence,
                x = bbox.x,
                y = bbox.y,
                width = bbox.width,
                height = bbox.height,
                label = *label,
                "annotation"
            );
        }
    }
}
