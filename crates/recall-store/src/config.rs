use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::paths::{base_dir, default_state_dir, non_empty, RecallPaths};

/// Recognized options in `<base>/config.json`. Every field has a default, so a
/// missing or partial file is fine; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Minimum hours between two decay scans.
    pub decay_interval_hours: u64,
    /// Lessons not cited for this many days decay.
    pub decay_after_days: u64,
    /// Citation count at which a recently cited lesson is promoted.
    pub promote_threshold: u64,
    /// A lesson must have been cited within this many days to be promoted.
    pub promote_window_days: u64,
    pub log_path: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    /// Monitor polling tick.
    pub tick_ms: u64,
    /// Live feed ring size.
    pub feed_capacity: usize,
    /// Window for the windowed citation rate.
    pub citation_window_minutes: u64,
    /// Session citation state older than this is pruned.
    pub session_idle_hours: u64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            decay_interval_hours: 24,
            decay_after_days: 30,
            promote_threshold: 10,
            promote_window_days: 30,
            log_path: None,
            state_dir: None,
            tick_ms: 500,
            feed_capacity: 500,
            citation_window_minutes: 60,
            session_idle_hours: 24,
        }
    }
}

impl RecallConfig {
    /// Read `config.json`. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Read `config.json`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `RECALL_LOG_PATH`, `CLAUDE_RECALL_STATE` (or its short alias
    /// `RECALL_STATE`) and `RECALL_DECAY_INTERVAL_HOURS`. Empty values are
    /// ignored; unparseable numbers keep the current value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(p) = non_empty(&lookup, "RECALL_LOG_PATH") {
            self.log_path = Some(PathBuf::from(p));
        }
        if let Some(p) = non_empty(&lookup, "CLAUDE_RECALL_STATE")
            .or_else(|| non_empty(&lookup, "RECALL_STATE"))
        {
            self.state_dir = Some(PathBuf::from(p));
        }
        if let Some(hours) = lookup("RECALL_DECAY_INTERVAL_HOURS").and_then(|v| v.trim().parse().ok())
        {
            self.decay_interval_hours = hours;
        }
    }

    /// Resolve every path for `project_root`, honoring overrides.
    pub fn resolve_paths(&self, base_dir: &Path, project_root: &Path) -> RecallPaths {
        let mut paths = RecallPaths::discover(base_dir, project_root);
        if let Some(dir) = &self.state_dir {
            paths = paths.with_state_dir(dir);
        }
        if let Some(log) = &self.log_path {
            paths = paths.with_log_path(log);
        }
        paths
    }

    pub fn decay_interval(&self) -> time::Duration {
        span(self.decay_interval_hours, HOUR)
    }

    pub fn decay_after(&self) -> time::Duration {
        span(self.decay_after_days, DAY)
    }

    pub fn promote_window(&self) -> time::Duration {
        span(self.promote_window_days, DAY)
    }

    pub fn citation_window(&self) -> time::Duration {
        span(self.citation_window_minutes, MINUTE)
    }

    pub fn session_idle(&self) -> time::Duration {
        span(self.session_idle_hours, HOUR)
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms.max(50))
    }
}

/// Load configuration and resolve paths from the process environment. Without
/// a configured state dir the log is looked for where agent sessions write it
/// (see [`default_state_dir`]).
pub fn resolve(project_root: &Path) -> anyhow::Result<(RecallConfig, RecallPaths)> {
    let base = base_dir();
    let config = RecallConfig::load_with_env(&base.join("config.json"))?;
    let mut effective = config.clone();
    if effective.state_dir.is_none() {
        effective.state_dir = default_state_dir();
    }
    let paths = effective.resolve_paths(&base, project_root);
    Ok((config, paths))
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// `count` units of `unit_secs` seconds, saturating at the largest duration.
fn span(count: u64, unit_secs: u64) -> time::Duration {
    let secs = count.saturating_mul(unit_secs);
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = RecallConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, RecallConfig::default());
        assert_eq!(config.decay_interval(), time::Duration::hours(24));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"decay_after_days": 7, "promote_threshold": 3, "future_key": true}"#,
        )
        .unwrap();
        let config = RecallConfig::load(&path).unwrap();
        assert_eq!(config.decay_after_days, 7);
        assert_eq!(config.promote_threshold, 3);
        assert_eq!(config.decay_interval_hours, 24);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"decay_after_days": "soon"}"#).unwrap();
        assert!(RecallConfig::load(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RecallConfig::default();
        config.apply_overrides(|k| match k {
            "RECALL_LOG_PATH" => Some("/logs/debug.log".into()),
            "RECALL_STATE" => Some("/state".into()),
            "RECALL_DECAY_INTERVAL_HOURS" => Some("6".into()),
            _ => None,
        });
        assert_eq!(config.log_path, Some(PathBuf::from("/logs/debug.log")));
        assert_eq!(config.state_dir, Some(PathBuf::from("/state")));
        assert_eq!(config.decay_interval_hours, 6);

        config.apply_overrides(|k| (k == "RECALL_DECAY_INTERVAL_HOURS").then(|| "often".into()));
        assert_eq!(config.decay_interval_hours, 6);
    }

    #[test]
    fn huge_durations_saturate() {
        let config = RecallConfig {
            decay_interval_hours: u64::MAX,
            decay_after_days: i64::MAX as u64,
            citation_window_minutes: u64::MAX / 2,
            ..RecallConfig::default()
        };
        assert_eq!(config.decay_interval(), time::Duration::seconds(i64::MAX));
        assert_eq!(config.decay_after(), time::Duration::seconds(i64::MAX));
        assert_eq!(config.citation_window(), time::Duration::seconds(i64::MAX));
        assert_eq!(config.promote_window(), time::Duration::days(30));
    }

    #[test]
    fn claude_recall_state_wins_over_alias() {
        let mut config = RecallConfig::default();
        config.apply_overrides(|k| match k {
            "CLAUDE_RECALL_STATE" => Some("/claude-state".into()),
            "RECALL_STATE" => Some("/alias".into()),
            _ => None,
        });
        assert_eq!(config.state_dir, Some(PathBuf::from("/claude-state")));

        let mut config = RecallConfig::default();
        config.apply_overrides(|k| match k {
            "CLAUDE_RECALL_STATE" => Some(String::new()),
            "RECALL_STATE" => Some("/alias".into()),
            _ => None,
        });
        assert_eq!(config.state_dir, Some(PathBuf::from("/alias")));
    }

    #[test]
    fn resolve_paths_honors_overrides() {
        let config = RecallConfig {
            state_dir: Some(PathBuf::from("/s")),
            ..RecallConfig::default()
        };
        let paths = config.resolve_paths(Path::new("/b"), Path::new("/r"));
        assert_eq!(paths.log_path, PathBuf::from("/s/debug.log"));

        let config = RecallConfig {
            state_dir: Some(PathBuf::from("/s")),
            log_path: Some(PathBuf::from("/l/x.log")),
            ..RecallConfig::default()
        };
        let paths = config.resolve_paths(Path::new("/b"), Path::new("/r"));
        assert_eq!(paths.log_path, PathBuf::from("/l/x.log"));
    }
}
