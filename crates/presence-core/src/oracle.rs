//! Recognition oracle: best-guess name for a detected person.
//!
//! The oracle only reports the nearest roster entry and its distance. Whether
//! that distance is good enough to name a track is decided by the reconciler.

use crate::roster::{Roster, RosterEntry};
use crate::types::{Detection, Embedding, Recognition, UNKNOWN_NAME};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Face-matching capability consumed by the reconciler.
pub trait RecognitionOracle {
    /// Best roster match for the detected region, or `None` for "no match".
    fn recognize(&mut self, region: &Detection) -> Option<Recognition>;
}

/// Strategy for comparing a probe encoding against the roster.
pub trait Matcher {
    fn nearest(&self, probe: &Embedding, roster: &[RosterEntry]) -> Option<Recognition>;
}

/// Nearest-neighbour matcher over Euclidean encoding distance.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Embedding, roster: &[RosterEntry]) -> Option<Recognition> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in roster.iter().enumerate() {
            let dist = probe.euclidean_distance(&entry.encoding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        best_idx.map(|idx| Recognition {
            name: roster[idx].name.clone(),
            distance: best_dist,
        })
    }
}

/// Oracle backed by the known-face roster.
///
/// Matches the encoding carried by the detection; a region without a face
/// encoding is "no match".
pub struct RosterOracle<M: Matcher = EuclideanMatcher> {
    roster: Roster,
    matcher: M,
}

impl RosterOracle<EuclideanMatcher> {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster,
            matcher: EuclideanMatcher,
        }
    }
}

impl<M: Matcher> RosterOracle<M> {
    pub fn with_matcher(roster: Roster, matcher: M) -> Self {
        Self { roster, matcher }
    }
}

impl<M: Matcher> RecognitionOracle for RosterOracle<M> {
    fn recognize(&mut self, region: &Detection) -> Option<Recognition> {
        let probe = region.encoding.as_ref()?;
        self.matcher.nearest(probe, self.roster.entries())
    }
}

/// Oracle that never recognizes anyone.
pub struct NullOracle;

impl RecognitionOracle for NullOracle {
    fn recognize(&mut self, _region: &Detection) -> Option<Recognition> {
        None
    }
}

/// Oracle workers abandoned mid-call that may still be running.
const MAX_STALLED_WORKERS: usize = 2;

type OracleFactory = Box<dyn Fn() -> Box<dyn RecognitionOracle + Send> + Send>;

struct Worker {
    tx: mpsc::Sender<Detection>,
    rx: mpsc::Receiver<Option<Recognition>>,
    abandoned: Arc<AtomicBool>,
}

/// Decrements the stalled count when an abandoned worker thread finally exits.
struct StallGuard {
    abandoned: Arc<AtomicBool>,
    stalled: Arc<AtomicUsize>,
}

impl Drop for StallGuard {
    fn drop(&mut self) {
        if self.abandoned.load(Ordering::SeqCst) {
            self.stalled.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Runs an oracle on a worker thread and bounds each call by a time budget.
///
/// A call that does not answer within the budget reads as "no match". Its
/// worker is abandoned with the call still in flight and the next call gets
/// a fresh oracle from the factory, so one slow call never delays the ones
/// after it. While [`MAX_STALLED_WORKERS`] abandoned workers are still busy,
/// calls read as "no match" without starting another.
pub struct BudgetedOracle {
    budget: Duration,
    factory: OracleFactory,
    worker: Option<Worker>,
    stalled: Arc<AtomicUsize>,
}

impl BudgetedOracle {
    pub fn spawn<F, O>(factory: F, budget: Duration) -> std::io::Result<Self>
    where
        F: Fn() -> O + Send + 'static,
        O: RecognitionOracle + Send + 'static,
    {
        let mut oracle = Self {
            budget,
            factory: Box::new(move || -> Box<dyn RecognitionOracle + Send> { Box::new(factory()) }),
            worker: None,
            stalled: Arc::new(AtomicUsize::new(0)),
        };
        oracle.worker = Some(oracle.start_worker()?);
        Ok(oracle)
    }

    /// Abandoned workers that have not returned yet.
    pub fn stalled_workers(&self) -> usize {
        self.stalled.load(Ordering::SeqCst)
    }

    fn start_worker(&self) -> std::io::Result<Worker> {
        let mut inner = (self.factory)();
        let (req_tx, req_rx) = mpsc::channel::<Detection>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let abandoned = Arc::new(AtomicBool::new(false));
        let guard = StallGuard {
            abandoned: abandoned.clone(),
            stalled: self.stalled.clone(),
        };

        std::thread::Builder::new()
            .name("presence-oracle".into())
            .spawn(move || {
                let _guard = guard;
                tracing::debug!("oracle thread started");
                while let Ok(region) = req_rx.recv() {
                    if reply_tx.send(inner.recognize(&region)).is_err() {
                        break;
                    }
                }
                tracing::debug!("oracle thread exiting");
            })?;

        Ok(Worker {
            tx: req_tx,
            rx: reply_rx,
            abandoned,
        })
    }

    /// Drop the current worker with its call still running.
    fn abandon_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.stalled.fetch_add(1, Ordering::SeqCst);
            worker.abandoned.store(true, Ordering::SeqCst);
        }
    }

    fn ready_worker(&mut self) -> Option<&Worker> {
        if self.worker.is_none() {
            let stalled = self.stalled_workers();
            if stalled >= MAX_STALLED_WORKERS {
                tracing::debug!(stalled, "oracle workers stalled; treating as no match");
                return None;
            }
            match self.start_worker() {
                Ok(worker) => self.worker = Some(worker),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to start oracle worker; treating as no match");
                    return None;
                }
            }
        }
        self.worker.as_ref()
    }
}

impl RecognitionOracle for BudgetedOracle {
    fn recognize(&mut self, region: &Detection) -> Option<Recognition> {
        let budget = self.budget;
        let worker = self.ready_worker()?;

        let outcome = match worker.tx.send(region.clone()) {
            Ok(()) => worker.rx.recv_timeout(budget),
            Err(_) => Err(mpsc::RecvTimeoutError::Disconnected),
        };

        match outcome {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    budget_ms = budget.as_millis() as u64,
                    "oracle exceeded budget; treating as no match"
                );
                self.abandon_worker();
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!("oracle worker gone; treating as no match");
                self.worker = None;
                None
            }
        }
    }
}

/// Whether an oracle answer is good enough to name a track.
pub fn accepts(recognition: &Recognition, accept_distance: f32) -> bool {
    recognition.distance < accept_distance
        && !recognition.name.trim().is_empty()
        && recognition.name != UNKNOWN_NAME
}
