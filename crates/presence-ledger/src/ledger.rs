//! Presence ledger: turns track lifecycle events into durable sessions.
//!
//! One session per track lifetime: opened on `Started`, named on
//! `Identified`, closed on `Ended`. A frame's events are written in a single
//! batch; the in-memory track → session map is only updated after that batch
//! commits, so a failed frame leaves both the store and the map untouched.

use crate::store::{SessionId, SessionStore, StoreError};
use chrono::{DateTime, Utc};
use presence_core::{TrackEvent, TrackId, UNKNOWN_NAME};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("session store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// A persisted change produced by one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SessionOpened {
        track_id: TrackId,
        session_id: SessionId,
    },
    SessionClosed {
        track_id: TrackId,
        session_id: SessionId,
    },
    /// `Ended` for a track whose session was already closed. Nothing written.
    AlreadyClosed { track_id: TrackId },
    SessionRenamed {
        track_id: TrackId,
        session_id: SessionId,
        name: String,
    },
    /// `Identified` that would not upgrade the session name: the session is
    /// already named, or the name is empty or "Unknown". Nothing written.
    NameKept {
        track_id: TrackId,
        session_id: SessionId,
    },
    MovementRecorded {
        track_id: TrackId,
        session_id: SessionId,
        movement_id: i64,
        area: String,
    },
}

/// An event that disagrees with the ledger's view of open sessions.
/// The event is skipped; the rest of the frame still applies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerAnomaly {
    #[error("{event} event for track {track_id} with no open session")]
    NoOpenSession { track_id: TrackId, event: &'static str },
    #[error("track {track_id} started again; track ids are never reused")]
    DuplicateStart { track_id: TrackId },
}

/// Outcome of applying one frame's events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub mutations: Vec<Mutation>,
    pub anomalies: Vec<LedgerAnomaly>,
}

/// Maintains durable session records for tracked people.
pub struct PresenceLedger {
    store: SessionStore,
    /// Open session per live track.
    open: HashMap<TrackId, SessionId>,
    /// Highest track id ever started. Track ids are never reused, so any id
    /// at or below it without an open session belongs to an ended track.
    highest_started: Option<TrackId>,
}

impl PresenceLedger {
    /// Wrap a store. Sessions left open by a previous run are closed at `now`,
    /// since no track of this run can own them.
    pub fn open(mut store: SessionStore, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let batch = store.begin()?;
        let recovered = batch.close_all_open(now)?;
        batch.commit()?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "closed sessions left open by a previous run");
        }

        Ok(Self {
            store,
            open: HashMap::new(),
            highest_started: None,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Open session for a track, if any.
    pub fn session_for(&self, track_id: TrackId) -> Option<SessionId> {
        self.open.get(&track_id).copied()
    }

    pub fn open_sessions(&self) -> usize {
        self.open.len()
    }

    /// Apply one frame's events atomically.
    ///
    /// `at` is the frame timestamp used for entry, exit and movement times.
    pub fn apply(&mut self, events: &[TrackEvent], at: DateTime<Utc>) -> Result<FrameReport, LedgerError> {
        let mut report = FrameReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut open = self.open.clone();
        let mut highest_started = self.highest_started;
        let has_ended =
            |open: &HashMap<TrackId, SessionId>, highest: Option<TrackId>, track_id: TrackId| {
                !open.contains_key(&track_id) && highest.is_some_and(|h| track_id <= h)
            };

        let batch = self.store.begin()?;
        for event in events {
            match event {
                TrackEvent::Started { track_id } => {
                    if open.contains_key(track_id) || has_ended(&open, highest_started, *track_id) {
                        report.anomalies.push(LedgerAnomaly::DuplicateStart {
                            track_id: *track_id,
                        });
                        continue;
                    }
                    let session_id = batch.insert_session(UNKNOWN_NAME, at)?;
                    open.insert(*track_id, session_id);
                    highest_started = highest_started.max(Some(*track_id));
                    report.mutations.push(Mutation::SessionOpened {
                        track_id: *track_id,
                        session_id,
                    });
                }
                TrackEvent::Ended { track_id } => {
                    if let Some(session_id) = open.remove(track_id) {
                        let mutation = if batch.close_session(session_id, at)? {
                            Mutation::SessionClosed {
                                track_id: *track_id,
                                session_id,
                            }
                        } else {
                            Mutation::AlreadyClosed {
                                track_id: *track_id,
                            }
                        };
                        report.mutations.push(mutation);
                    } else if has_ended(&open, highest_started, *track_id) {
                        report.mutations.push(Mutation::AlreadyClosed {
                            track_id: *track_id,
                        });
                    } else {
                        report.anomalies.push(LedgerAnomaly::NoOpenSession {
                            track_id: *track_id,
                            event: event.kind(),
                        });
                    }
                }
                TrackEvent::Identified { track_id, name } => {
                    let Some(&session_id) = open.get(track_id) else {
                        report.anomalies.push(LedgerAnomaly::NoOpenSession {
                            track_id: *track_id,
                            event: event.kind(),
                        });
                        continue;
                    };
                    let resolved = !name.trim().is_empty() && name != UNKNOWN_NAME;
                    let mutation = if resolved && batch.name_session(session_id, name)? {
                        Mutation::SessionRenamed {
                            track_id: *track_id,
                            session_id,
                            name: name.clone(),
                        }
                    } else {
                        Mutation::NameKept {
                            track_id: *track_id,
                            session_id,
                        }
                    };
                    report.mutations.push(mutation);
                }
                TrackEvent::ZoneChanged { track_id, area } => {
                    let Some(&session_id) = open.get(track_id) else {
                        report.anomalies.push(LedgerAnomaly::NoOpenSession {
                            track_id: *track_id,
                            event: event.kind(),
                        });
                        continue;
                    };
                    let movement_id = batch.insert_movement(session_id, at, area)?;
                    report.mutations.push(Mutation::MovementRecorded {
                        track_id: *track_id,
                        session_id,
                        movement_id,
                        area: area.clone(),
                    });
                }
            }
        }
        batch.commit()?;

        self.open = open;
        self.highest_started = highest_started;

        for mutation in &report.mutations {
            log_mutation(mutation, at);
        }
        for anomaly in &report.anomalies {
            tracing::error!(frame_time = %at, %anomaly, "ledger desynchronized; event skipped");
        }

        Ok(report)
    }

    /// Close every open session at `at`, as if all live tracks ended together.
    ///
    /// Returns the number of sessions closed.
    pub fn close_all(&mut self, at: DateTime<Utc>) -> Result<usize, LedgerError> {
        if self.open.is_empty() {
            return Ok(0);
        }

        let batch = self.store.begin()?;
        let mut closed = 0;
        for &session_id in self.open.values() {
            if batch.close_session(session_id, at)? {
                closed += 1;
            }
        }
        batch.commit()?;

        tracing::info!(count = closed, "closed all open sessions");
        self.open.clear();
        Ok(closed)
    }
}

fn log_mutation(mutation: &Mutation, at: DateTime<Utc>) {
    match mutation {
        Mutation::SessionOpened { track_id, session_id } => {
            tracing::info!(track_id, session_id, entry_time = %at, "session opened");
        }
        Mutation::SessionClosed { track_id, session_id } => {
            tracing::info!(track_id, session_id, exit_time = %at, "session closed");
        }
        Mutation::AlreadyClosed { track_id } => {
            tracing::debug!(track_id, "session already closed");
        }
        Mutation::SessionRenamed {
            track_id,
            session_id,
            name,
        } => {
            tracing::info!(track_id, session_id, name = %name, "session named");
        }
        Mutation::NameKept { track_id, session_id } => {
            tracing::debug!(track_id, session_id, "session name kept");
        }
        Mutation::MovementRecorded {
            track_id,
            session_id,
            area,
            ..
        } => {
            tracing::debug!(track_id, session_id, area = %area, "movement recorded");
        }
    }
}
