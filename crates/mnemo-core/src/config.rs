//! Engine configuration
//!
//! Every hand-tuned threshold lives here under a name so deployments can
//! override it without touching the algorithms that read it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Similarity at or above which two facts are the same fact
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.9;

/// Similarity above which consolidation links two facts
pub const DEFAULT_LINK_THRESHOLD: f64 = 0.75;

/// Snapshots kept in memory before the oldest is dropped
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 100;

/// Per-section character budget when rendering context
pub const DEFAULT_SECTION_BUDGET: usize = 2500;

/// Total character budget when rendering context
pub const DEFAULT_CONTEXT_BUDGET: usize = 15000;

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Tunables for the memory engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Dedup similarity threshold for facts
    pub dedup_threshold: f64,
    /// Candidates inspected when deduplicating
    pub dedup_candidates: usize,
    /// Cross-link similarity threshold
    pub link_threshold: f64,
    /// Neighbours considered per unlinked fact
    pub link_fanout: usize,
    /// Unlinked facts considered per consolidation run
    pub link_batch: usize,
    /// Facts surfaced by `predict_and_preload`
    pub preload_limit: usize,
    /// Minimum heat for a memory to count as hot
    pub hot_threshold: f64,
    /// Heat below which a memory is cold
    pub cold_threshold: f64,
    /// Heat below which a memory is archived
    pub archive_threshold: f64,
    /// Maximum memories archived per call
    pub archive_batch: usize,
    /// Days without reinforcement before belief confidence decays
    pub belief_idle_days: i64,
    /// Snapshot ring capacity
    pub snapshot_capacity: usize,
    /// Confidence under which old records are captured in snapshots
    pub snapshot_low_confidence: f64,
    /// Age in days after which low-confidence records are captured
    pub snapshot_prune_age_days: i64,
    /// Window in days of recent facts captured in snapshots
    pub snapshot_recent_days: i64,
    /// Messages read by fact extraction
    pub extraction_window: usize,
    /// Per-section context budget in characters
    pub section_budget: usize,
    /// Total context budget in characters
    pub context_budget: usize,
    /// Timeout handed to collaborators on every call
    pub collaborator_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            dedup_candidates: 3,
            link_threshold: DEFAULT_LINK_THRESHOLD,
            link_fanout: 5,
            link_batch: 20,
            preload_limit: 5,
            hot_threshold: 0.5,
            cold_threshold: 0.1,
            archive_threshold: 0.05,
            archive_batch: 20,
            belief_idle_days: 7,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            snapshot_low_confidence: 0.3,
            snapshot_prune_age_days: 7,
            snapshot_recent_days: 30,
            extraction_window: 20,
            section_budget: DEFAULT_SECTION_BUDGET,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            collaborator_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `MNEMO_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `MNEMO_*` key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        override_from(&lookup, "MNEMO_DEDUP_THRESHOLD", &mut config.dedup_threshold)?;
        override_from(&lookup, "MNEMO_LINK_THRESHOLD", &mut config.link_threshold)?;
        override_from(&lookup, "MNEMO_LINK_FANOUT", &mut config.link_fanout)?;
        override_from(&lookup, "MNEMO_PRELOAD_LIMIT", &mut config.preload_limit)?;
        override_from(&lookup, "MNEMO_ARCHIVE_THRESHOLD", &mut config.archive_threshold)?;
        override_from(&lookup, "MNEMO_SNAPSHOT_CAPACITY", &mut config.snapshot_capacity)?;
        override_from(&lookup, "MNEMO_CONTEXT_BUDGET", &mut config.context_budget)?;
        override_from(
            &lookup,
            "MNEMO_COLLABORATOR_TIMEOUT_MS",
            &mut config.collaborator_timeout_ms,
        )?;
        config.check()?;
        Ok(config)
    }

    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.check()?;
        Ok(config)
    }

    /// Collaborator timeout as a [`Duration`]
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let unit = [
            ("dedupThreshold", self.dedup_threshold),
            ("linkThreshold", self.link_threshold),
            ("hotThreshold", self.hot_threshold),
            ("archiveThreshold", self.archive_threshold),
            ("snapshotLowConfidence", self.snapshot_low_confidence),
        ];
        for (key, value) in unit {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                });
            }
        }
        if self.snapshot_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "snapshotCapacity",
                value: "0".into(),
            });
        }
        Ok(())
    }
}

fn override_from<F, T>(lookup: &F, key: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_named_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.dedup_threshold, DEFAULT_DEDUP_THRESHOLD);
        assert_eq!(config.link_threshold, DEFAULT_LINK_THRESHOLD);
        assert_eq!(config.snapshot_capacity, 100);
        assert_eq!(config.collaborator_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MNEMO_DEDUP_THRESHOLD", "0.95"),
            ("MNEMO_SNAPSHOT_CAPACITY", "10"),
        ]
        .into_iter()
        .collect();

        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.dedup_threshold, 0.95);
        assert_eq!(config.snapshot_capacity, 10);
        assert_eq!(config.link_threshold, DEFAULT_LINK_THRESHOLD);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|key| {
            (key == "MNEMO_LINK_FANOUT").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MNEMO_LINK_FANOUT", .. }));

        let err = EngineConfig::from_lookup(|key| {
            (key == "MNEMO_SNAPSHOT_CAPACITY").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_json_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.json");
        std::fs::write(&path, r#"{"linkThreshold": 0.8, "preloadLimit": 3}"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.link_threshold, 0.8);
        assert_eq!(config.preload_limit, 3);
        assert_eq!(config.dedup_threshold, DEFAULT_DEDUP_THRESHOLD);
    }
}
