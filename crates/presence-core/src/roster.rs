//! Known-face roster: a versioned JSON mapping from name to face encoding.
//!
//! On-disk layout:
//!
//! ```json
//! {
//!   "version": 1,
//!   "dimension": 128,
//!   "entries": [
//!     { "name": "Jane", "encoding": [0.01, ...], "enrolled_at": "2026-01-01T00:00:00Z" }
//!   ]
//! }
//! ```
//!
//! Every encoding must have exactly `dimension` finite values and names are
//! unique. A roster is validated in full at load time.

use crate::types::Embedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Current roster file format version.
pub const ROSTER_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported roster version {0} (expected {ROSTER_FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("encoding for {name:?} has {actual} values, roster dimension is {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("encoding for {0:?} contains non-finite values")]
    NonFiniteEncoding(String),
    #[error("roster entry has an empty name")]
    EmptyName,
    #[error("duplicate roster entry {0:?}")]
    DuplicateName(String),
}

/// One known face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub encoding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RosterFile {
    version: u32,
    dimension: usize,
    entries: Vec<RosterEntry>,
}

/// In-memory known-face roster.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// Encoding length shared by all entries. Zero until the first enrollment.
    dimension: usize,
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a roster from disk. A missing file yields an empty roster.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let roster = Self::from_json(&contents)?;
                tracing::info!(
                    path = %path.display(),
                    entries = roster.len(),
                    dimension = roster.dimension,
                    "loaded roster"
                );
                Ok(roster)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no roster file, starting with empty roster");
                Ok(Self::empty())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and validate a roster document.
    pub fn from_json(contents: &str) -> Result<Self, RosterError> {
        let file: RosterFile = serde_json::from_str(contents)?;
        if file.version != ROSTER_FORMAT_VERSION {
            return Err(RosterError::UnsupportedVersion(file.version));
        }

        let mut roster = Self {
            dimension: file.dimension,
            entries: Vec::with_capacity(file.entries.len()),
        };
        for entry in file.entries {
            roster.check_entry(&entry.name, &entry.encoding)?;
            if roster.get(&entry.name).is_some() {
                return Err(RosterError::DuplicateName(entry.name));
            }
            roster.entries.push(entry);
        }
        Ok(roster)
    }

    /// Serialize to the versioned JSON document.
    pub fn to_json(&self) -> Result<String, RosterError> {
        let file = RosterFile {
            version: ROSTER_FORMAT_VERSION,
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Write the roster to disk, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), RosterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!(path = %path.display(), entries = self.len(), "saved roster");
        Ok(())
    }

    /// Add a face, replacing any existing entry with the same name.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn enroll(
        &mut self,
        name: &str,
        encoding: Embedding,
        enrolled_at: DateTime<Utc>,
    ) -> Result<bool, RosterError> {
        let name = name.trim();
        if self.entries.is_empty() {
            self.dimension = encoding.dimension();
        }
        self.check_entry(name, &encoding)?;

        let entry = RosterEntry {
            name: name.to_string(),
            encoding,
            enrolled_at,
        };
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => {
                *existing = entry;
                Ok(true)
            }
            None => {
                self.entries.push(entry);
                Ok(false)
            }
        }
    }

    /// Remove a face by name. Returns `true` if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        if self.entries.is_empty() {
            self.dimension = 0;
        }
        self.entries.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_entry(&self, name: &str, encoding: &Embedding) -> Result<(), RosterError> {
        if name.trim().is_empty() {
            return Err(RosterError::EmptyName);
        }
        if encoding.dimension() != self.dimension || self.dimension == 0 {
            return Err(RosterError::DimensionMismatch {
                name: name.to_string(),
                expected: self.dimension,
                actual: encoding.dimension(),
            });
        }
        if !encoding.is_finite() {
            return Err(RosterError::NonFiniteEncoding(name.to_string()));
        }
        Ok(())
    }
}
