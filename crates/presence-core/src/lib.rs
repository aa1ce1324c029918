//! presence-core: Identity tracking for a single-camera presence monitor.
//!
//! Reconciles per-frame person detections into stable tracks, resolves
//! names against a known-face roster, and emits the track lifecycle events
//! the presence ledger persists.

pub mod oracle;
pub mod reconciler;
pub mod roster;
pub mod source;
pub mod types;
pub mod zone;

pub use oracle::{BudgetedOracle, EuclideanMatcher, Matcher, NullOracle, RecognitionOracle, RosterOracle};
pub use reconciler::{Reconciler, ReconcilerConfig, Reconciliation};
pub use roster::{Roster, RosterEntry, RosterError};
pub use source::{DetectionSource, ReplaySource, ScriptedSource, SourceError};
pub use types::{
    BoundingBox, Centroid, Detection, Embedding, FrameDetections, Recognition, Track, TrackEvent,
    TrackId, UNKNOWN_NAME,
};
pub use zone::{ZoneClassifier, ZoneError, ZoneMap};

use std::path::PathBuf;

/// Default data directory: `$XDG_DATA_HOME/presence`, else `~/.local/share/presence`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence")
}

/// Ledger database path from `PRESENCE_DB_PATH`, else the data directory default.
pub fn default_db_path() -> PathBuf {
    std::env::var("PRESENCE_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir().join("presence.db"))
}

/// Roster path from `PRESENCE_ROSTER_PATH`, else the data directory default.
pub fn default_roster_path() -> PathBuf {
    std::env::var("PRESENCE_ROSTER_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir().join("roster.json"))
}
