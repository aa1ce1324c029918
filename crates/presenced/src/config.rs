use presence_core::ReconcilerConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite ledger.
    pub db_path: PathBuf,
    /// Path to the known-face roster.
    pub roster_path: PathBuf,
    /// Detection replay file; `None` reads from stdin.
    pub source_path: Option<PathBuf>,
    /// Optional zone map; enables movement records.
    pub zones_path: Option<PathBuf>,
    /// Largest centroid distance (pixels) still matched to the same track.
    pub max_match_distance: f32,
    /// Consecutive missed frames a track survives.
    pub eviction_threshold: u32,
    /// Face-encoding distance below which a name is accepted.
    pub accept_distance: f32,
    /// Time budget per recognition call in milliseconds; 0 disables the budget.
    pub recognition_budget_ms: u64,
    /// IoU for suppressing overlapping replayed boxes; 0 disables suppression.
    pub nms_overlap: f32,
    /// Pause between replayed frames in milliseconds.
    pub frame_interval_ms: u64,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = presence_core::default_data_dir();
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        Self {
            db_path: path("PRESENCE_DB_PATH").unwrap_or_else(|| data_dir.join("presence.db")),
            roster_path: path("PRESENCE_ROSTER_PATH")
                .unwrap_or_else(|| data_dir.join("roster.json")),
            source_path: path("PRESENCE_SOURCE").filter(|p| p.as_os_str() != "-"),
            zones_path: path("PRESENCE_ZONES_PATH"),
            max_match_distance: parse(&lookup, "PRESENCE_MAX_MATCH_DISTANCE", 75.0),
            eviction_threshold: parse(&lookup, "PRESENCE_EVICTION_THRESHOLD", 1),
            accept_distance: parse(&lookup, "PRESENCE_ACCEPT_DISTANCE", 0.6),
            recognition_budget_ms: parse(&lookup, "PRESENCE_RECOGNITION_BUDGET_MS", 200),
            nms_overlap: parse(&lookup, "PRESENCE_NMS_OVERLAP", 0.65),
            frame_interval_ms: parse(&lookup, "PRESENCE_FRAME_INTERVAL_MS", 0),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_match_distance: self.max_match_distance,
            eviction_threshold: self.eviction_threshold,
            accept_distance: self.accept_distance,
        }
    }

    pub fn recognition_budget(&self) -> Option<Duration> {
        (self.recognition_budget_ms > 0).then(|| Duration::from_millis(self.recognition_budget_ms))
    }

    pub fn nms_overlap(&self) -> Option<f32> {
        (self.nms_overlap > 0.0).then_some(self.nms_overlap)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert!((c.max_match_distance - 75.0).abs() < 1e-6);
        assert_eq!(c.eviction_threshold, 1);
        assert!((c.accept_distance - 0.6).abs() < 1e-6);
        assert_eq!(c.recognition_budget(), Some(Duration::from_millis(200)));
        assert_eq!(c.nms_overlap(), Some(0.65));
        assert!(c.source_path.is_none());
        assert!(c.zones_path.is_none());
        assert!(c.db_path.ends_with("presence.db"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("PRESENCE_DB_PATH", "/var/lib/presence/ledger.db"),
            ("PRESENCE_SOURCE", "/tmp/frames.jsonl"),
            ("PRESENCE_ZONES_PATH", "/etc/presence/zones.toml"),
            ("PRESENCE_MAX_MATCH_DISTANCE", "40.5"),
            ("PRESENCE_EVICTION_THRESHOLD", "0"),
            ("PRESENCE_RECOGNITION_BUDGET_MS", "0"),
            ("PRESENCE_NMS_OVERLAP", "0"),
        ]);
        assert_eq!(c.db_path, PathBuf::from("/var/lib/presence/ledger.db"));
        assert_eq!(c.source_path, Some(PathBuf::from("/tmp/frames.jsonl")));
        assert_eq!(c.zones_path, Some(PathBuf::from("/etc/presence/zones.toml")));
        assert!((c.max_match_distance - 40.5).abs() < 1e-6);
        assert_eq!(c.reconciler_config().eviction_threshold, 0);
        assert!(c.recognition_budget().is_none());
        assert!(c.nms_overlap().is_none());
    }

    #[test]
    fn test_stdin_source_and_bad_numbers() {
        let c = config(&[
            ("PRESENCE_SOURCE", "-"),
            ("PRESENCE_EVICTION_THRESHOLD", "lots"),
        ]);
        assert!(c.source_path.is_none());
        assert_eq!(c.eviction_threshold, 1);
    }
}
