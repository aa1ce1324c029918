//! Zone classification: maps a track position to an area label.
//!
//! Zone maps are TOML files with one `[[zone]]` table per area:
//!
//! ```toml
//! [[zone]]
//! name = "doorway"
//! x = 0
//! y = 0
//! width = 120
//! height = 480
//! ```

use crate::types::{BoundingBox, Centroid};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("zone map I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad zone map TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("zone {0:?} has degenerate geometry")]
    Degenerate(String),
}

/// Reports the area a position belongs to, if any.
pub trait ZoneClassifier {
    fn classify(&self, point: Centroid) -> Option<&str>;
}

/// A named rectangular area of the frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Zone {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Zone {
    fn rect(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Deserialize)]
struct ZoneFile {
    #[serde(default, rename = "zone")]
    zones: Vec<Zone>,
}

/// Ordered list of rectangular zones. The first zone containing a point wins.
#[derive(Debug, Clone, Default)]
pub struct ZoneMap {
    zones: Vec<Zone>,
}

impl ZoneMap {
    pub fn new(zones: Vec<Zone>) -> Result<Self, ZoneError> {
        if let Some(bad) = zones.iter().find(|z| z.rect().is_degenerate()) {
            return Err(ZoneError::Degenerate(bad.name.clone()));
        }
        Ok(Self { zones })
    }

    pub fn from_toml(contents: &str) -> Result<Self, ZoneError> {
        let file: ZoneFile = toml::from_str(contents)?;
        Self::new(file.zones)
    }

    pub fn load(path: &Path) -> Result<Self, ZoneError> {
        let map = Self::from_toml(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), zones = map.zones.len(), "loaded zone map");
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl ZoneClassifier for ZoneMap {
    fn classify(&self, point: Centroid) -> Option<&str> {
        self.zones
            .iter()
            .find(|z| z.rect().contains(point))
            .map(|z| z.name.as_str())
    }
}
