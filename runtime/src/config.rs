//! Configuration loading and resolution.
//!
//! Defaults → JSON file → `HARVEST_*` environment overrides.

use crate::error::{HarvestError, HarvestResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stability detector timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub poll_interval_ms: u64,
    pub required_stable_ticks: u32,
    pub network_idle_ms: u64,
    /// Hard ceiling for one wait.
    pub ceiling_ms: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            required_stable_ticks: 3,
            network_idle_ms: 1000,
            ceiling_ms: 15_000,
        }
    }
}

impl StabilityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

/// Per-session hard caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCaps {
    pub max_pages: u32,
    pub max_records: usize,
    pub max_wall_clock_ms: u64,
    /// Sessions untouched for this long are dropped.
    pub idle_ttl_ms: u64,
    /// Finished session ids remembered so late calls still see `Complete`.
    pub max_tombstones: usize,
}

impl Default for SessionCaps {
    fn default() -> Self {
        Self {
            max_pages: 5,
            max_records: 250,
            max_wall_clock_ms: 60_000,
            idle_ttl_ms: 15 * 60_000,
            max_tombstones: 256,
        }
    }
}

impl SessionCaps {
    pub fn max_wall_clock(&self) -> Duration {
        Duration::from_millis(self.max_wall_clock_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }
}

/// Bounds for passive network capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub max_body_bytes: usize,
    pub max_responses: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 5 * 1024 * 1024,
            max_responses: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Largest image width we prefer when picking from a srcset.
    pub media_width_ceiling: u32,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            media_width_ceiling: 1600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Jaro-Winkler threshold for text fingerprints.
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
        }
    }
}

/// Which secondary fields satisfy the quality gate next to a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub accept_price: bool,
    pub accept_availability: bool,
    pub accept_external_id: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            accept_price: true,
            accept_availability: true,
            accept_external_id: true,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub stability: StabilityConfig,
    pub session: SessionCaps,
    pub capture: CaptureConfig,
    pub normalize: NormalizeConfig,
    pub dedup: DedupConfig,
    pub gate: GateConfig,
}

impl HarvestConfig {
    /// Resolve and load configuration, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> HarvestResult<Self> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarvestResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarvestError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| HarvestError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Apply `HARVEST_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parsed(lookup("HARVEST_POLL_INTERVAL_MS")) {
            self.stability.poll_interval_ms = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_STABLE_TICKS")) {
            self.stability.required_stable_ticks = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_NETWORK_IDLE_MS")) {
            self.stability.network_idle_ms = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_STABILITY_CEILING_MS")) {
            self.stability.ceiling_ms = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_MAX_PAGES")) {
            self.session.max_pages = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_MAX_RECORDS")) {
            self.session.max_records = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_MAX_WALL_CLOCK_MS")) {
            self.session.max_wall_clock_ms = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_SESSION_IDLE_TTL_MS")) {
            self.session.idle_ttl_ms = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_SIMILARITY_THRESHOLD")) {
            self.dedup.similarity_threshold = v;
        }
        if let Some(v) = parsed(lookup("HARVEST_MEDIA_WIDTH_CEILING")) {
            self.normalize.media_width_ceiling = v;
        }
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.stability.poll_interval_ms == 0 {
            return Err(HarvestError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.stability.required_stable_ticks == 0 {
            return Err(HarvestError::Config(
                "required_stable_ticks must be > 0".into(),
            ));
        }
        if self.stability.ceiling_ms < self.stability.poll_interval_ms {
            return Err(HarvestError::Config(
                "ceiling_ms must be at least one poll interval".into(),
            ));
        }
        if self.session.max_pages == 0 || self.session.max_records == 0 {
            return Err(HarvestError::Config("session caps must be > 0".into()));
        }
        if self.session.idle_ttl_ms == 0 {
            return Err(HarvestError::Config("idle_ttl_ms must be > 0".into()));
        }
        let t = self.dedup.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(HarvestError::Config(format!(
                "similarity_threshold {t} outside (0, 1]"
            )));
        }
        if !(self.gate.accept_price || self.gate.accept_availability || self.gate.accept_external_id)
        {
            return Err(HarvestError::Config(
                "quality gate needs at least one secondary field".into(),
            ));
        }
        Ok(())
    }
}

/// Resolve the config file path: explicit → `HARVEST_CONFIG` → `~/.harvest/config.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("HARVEST_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let default = dirs::home_dir()?.join(".harvest/config.json");
    default.exists().then_some(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = HarvestConfig::default();
        assert_eq!(c.stability.poll_interval_ms, 1000);
        assert_eq!(c.stability.required_stable_ticks, 3);
        assert_eq!(c.stability.ceiling_ms, 15_000);
        assert_eq!(c.session.max_pages, 5);
        assert_eq!(c.session.max_records, 250);
        assert_eq!(c.session.max_wall_clock_ms, 60_000);
        assert_eq!(c.session.idle_ttl(), Duration::from_secs(900));
        assert!((c.dedup.similarity_threshold - 0.92).abs() < f64::EPSILON);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"session": {{"max_pages": 2}}}}"#).unwrap();
        let c = HarvestConfig::from_file(file.path()).unwrap();
        assert_eq!(c.session.max_pages, 2);
        assert_eq!(c.session.max_records, 250);
        assert_eq!(c.stability.required_stable_ticks, 3);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = HarvestConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("HARVEST_MAX_RECORDS", "40"),
            ("HARVEST_SIMILARITY_THRESHOLD", "0.95"),
            ("HARVEST_STABLE_TICKS", "garbage"),
            ("HARVEST_SESSION_IDLE_TTL_MS", "5000"),
        ]
        .into_iter()
        .collect();
        let mut c = HarvestConfig::default();
        c.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.session.max_records, 40);
        assert!((c.dedup.similarity_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(c.stability.required_stable_ticks, 3);
        assert_eq!(c.session.idle_ttl_ms, 5000);
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut c = HarvestConfig::default();
        c.dedup.similarity_threshold = 1.5;
        assert!(c.validate().is_err());

        let mut c = HarvestConfig::default();
        c.stability.required_stable_ticks = 0;
        assert!(c.validate().is_err());

        let mut c = HarvestConfig::default();
        c.gate = GateConfig {
            accept_price: false,
            accept_availability: false,
            accept_external_id: false,
        };
        assert!(c.validate().is_err());
    }
}
