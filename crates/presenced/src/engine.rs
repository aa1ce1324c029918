use crate::render::FrameSink;
use chrono::{DateTime, Utc};
use presence_core::{DetectionSource, FrameDetections, Reconciler, SourceError, Track};
use presence_ledger::{FrameReport, LedgerError, PresenceLedger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detection source error: {0}")]
    Source(#[from] SourceError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result of processing one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    pub sequence: u64,
    pub active_tracks: usize,
    pub dropped: usize,
    pub report: FrameReport,
}

/// Totals for a completed run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub dropped_detections: usize,
    pub anomalies: usize,
    /// Sessions closed by the shutdown close-out.
    pub closed_at_shutdown: usize,
}

/// Detection → reconciler → ledger → renderer, one frame at a time.
///
/// Owns the active track set between frames.
pub struct Pipeline<S: FrameSink> {
    reconciler: Reconciler,
    tracks: Vec<Track>,
    ledger: PresenceLedger,
    sink: S,
    last_frame_at: Option<DateTime<Utc>>,
}

impl<S: FrameSink> Pipeline<S> {
    pub fn new(reconciler: Reconciler, ledger: PresenceLedger, sink: S) -> Self {
        Self {
            reconciler,
            tracks: Vec::new(),
            ledger,
            sink,
            last_frame_at: None,
        }
    }

    #[cfg(test)]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &PresenceLedger {
        &self.ledger
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run a single frame through the pipeline.
    ///
    /// Only a ledger store failure is returned as an error.
    pub fn process_frame(&mut self, frame: FrameDetections) -> Result<FrameOutcome, EngineError> {
        let sequence = frame.sequence;
        let captured_at = frame.captured_at;

        let previous = std::mem::take(&mut self.tracks);
        let reconciliation = self.reconciler.reconcile(previous, frame);
        let report = self.ledger.apply(&reconciliation.events, captured_at)?;

        self.sink.render(sequence, &reconciliation.labels());

        self.tracks = reconciliation.tracks;
        self.last_frame_at = Some(captured_at);

        Ok(FrameOutcome {
            sequence,
            active_tracks: self.tracks.len(),
            dropped: reconciliation.dropped,
            report,
        })
    }

    /// Pull frames until the source ends or `stop` is raised, then close out.
    ///
    /// `stop` is checked between frames. Open sessions are closed on every
    /// exit path, including a source failure.
    pub fn run(
        &mut self,
        source: &mut dyn DetectionSource,
        stop: &AtomicBool,
        frame_interval: Duration,
    ) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();
        let driven = self.drive(source, stop, frame_interval, &mut summary);

        let at = self.last_frame_at.unwrap_or_else(Utc::now);
        let closed = self.shutdown(at);

        driven?;
        summary.closed_at_shutdown = closed?;
        Ok(summary)
    }

    fn drive(
        &mut self,
        source: &mut dyn DetectionSource,
        stop: &AtomicBool,
        frame_interval: Duration,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        loop {
            if stop.load(Ordering::SeqCst) {
                tracing::info!(frames = summary.frames, "stop requested");
                return Ok(());
            }
            let Some(frame) = source.next_frame()? else {
                tracing::info!(frames = summary.frames, "detection source exhausted");
                return Ok(());
            };

            let outcome = self.process_frame(frame)?;
            tracing::debug!(
                frame = outcome.sequence,
                tracks = outcome.active_tracks,
                mutations = outcome.report.mutations.len(),
                "frame processed"
            );
            summary.frames += 1;
            summary.dropped_detections += outcome.dropped;
            summary.anomalies += outcome.report.anomalies.len();

            if !frame_interval.is_zero() {
                std::thread::sleep(frame_interval);
            }
        }
    }

    /// Close every open session and forget all tracks.
    pub fn shutdown(&mut self, at: DateTime<Utc>) -> Result<usize, EngineError> {
        let closed = self.ledger.close_all(at)?;
        self.tracks.clear();
        Ok(closed)
    }
}

/// Run the pipeline on a dedicated OS thread.
///
/// The run result is delivered on `reply` once the source ends or `stop` is
/// raised and all sessions are closed.
pub fn spawn_engine<S>(
    mut pipeline: Pipeline<S>,
    mut source: Box<dyn DetectionSource + Send>,
    stop: Arc<AtomicBool>,
    frame_interval: Duration,
    reply: oneshot::Sender<Result<RunSummary, EngineError>>,
) -> std::io::Result<()>
where
    S: FrameSink + Send + 'static,
{
    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = pipeline.run(source.as_mut(), &stop, frame_interval);
            let _ = reply.send(result);
            tracing::info!("engine thread exiting");
        })?;
    Ok(())
}
