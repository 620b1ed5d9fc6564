use std::path::{Path, PathBuf};

/// All well-known paths used by recall.
///
/// `base_dir` holds system-wide state (system lessons, decay marker, citation
/// state); `project_root` holds the project-local lesson store; `state_dir`
/// holds the debug event log the monitor tails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallPaths {
    pub base_dir: PathBuf,
    pub project_root: PathBuf,
    pub project_data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub system_lessons: PathBuf,
    pub project_lessons: PathBuf,
    pub decay_state: PathBuf,
    pub decay_lock: PathBuf,
    pub citation_state_dir: PathBuf,
    pub config_json: PathBuf,
    pub log_path: PathBuf,
    pub monitor_log: PathBuf,
}

impl RecallPaths {
    /// Derive all paths from a base dir and a project root. Only reads the
    /// filesystem to pick between the current and legacy project directory.
    pub fn discover(base_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let project_root = project_root.into();
        let project_data_dir = project_data_dir(&project_root);
        let state_dir = base_dir.join("state");
        Self {
            system_lessons: base_dir.join("lessons.json"),
            project_lessons: project_data_dir.join("lessons.json"),
            decay_state: base_dir.join(".decay-last-run"),
            decay_lock: base_dir.join(".decay.lock"),
            citation_state_dir: base_dir.join(".citation-state"),
            config_json: base_dir.join("config.json"),
            log_path: state_dir.join("debug.log"),
            monitor_log: state_dir.join("recall-monitor.log"),
            state_dir,
            project_data_dir,
            project_root,
            base_dir,
        }
    }

    /// Move the state directory, re-deriving the log paths under it.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self.log_path = self.state_dir.join("debug.log");
        self.monitor_log = self.state_dir.join("recall-monitor.log");
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [
            &self.base_dir,
            &self.project_data_dir,
            &self.state_dir,
            &self.citation_state_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Project name shown in events: the last component of the project root.
    pub fn project_name(&self) -> String {
        self.project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Sidecar lock path for a store file (`lessons.json` → `lessons.json.lock`).
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// File stem for a session id. Ids made only of `[A-Za-z0-9_-]` are used
/// verbatim (readable); anything else is hashed so it cannot escape the
/// state directory.
pub fn session_file_stem(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        session_id.to_string()
    } else {
        let hash = blake3::hash(session_id.as_bytes());
        format!("h_{}", &hash.to_hex()[..32])
    }
}

/// Project data directory, preferring `.recall/` over the legacy
/// `.coding-agent-lessons/` (only used when it exists and `.recall/` does not).
fn project_data_dir(project_root: &Path) -> PathBuf {
    let current = project_root.join(".recall");
    let legacy = project_root.join(".coding-agent-lessons");
    if !current.exists() && legacy.is_dir() {
        legacy
    } else {
        current
    }
}

/// System-wide base directory: `RECALL_BASE`, then legacy `LESSONS_BASE`,
/// then `~/.config/coding-agent-lessons`. Empty variables count as unset.
pub fn base_dir() -> PathBuf {
    base_dir_from(|key| std::env::var(key).ok())
}

pub(crate) fn base_dir_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) =
        non_empty(&lookup, "RECALL_BASE").or_else(|| non_empty(&lookup, "LESSONS_BASE"))
    {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".config").join("coding-agent-lessons"),
        None => PathBuf::from(".coding-agent-lessons"),
    }
}

/// Where agent sessions write `debug.log` when nothing overrides it:
/// `$XDG_STATE_HOME/claude-recall`, else `~/.local/state/claude-recall`.
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
        .map(|d| d.join("claude-recall"))
}

pub(crate) fn non_empty(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_builds_correct_paths() {
        let p = RecallPaths::discover("/tmp/base", "/tmp/repo");
        assert_eq!(p.system_lessons, PathBuf::from("/tmp/base/lessons.json"));
        assert_eq!(
            p.project_lessons,
            PathBuf::from("/tmp/repo/.recall/lessons.json")
        );
        assert_eq!(p.decay_state, PathBuf::from("/tmp/base/.decay-last-run"));
        assert_eq!(
            p.citation_state_dir,
            PathBuf::from("/tmp/base/.citation-state")
        );
        assert_eq!(p.log_path, PathBuf::from("/tmp/base/state/debug.log"));
        assert_eq!(p.project_name(), "repo");
    }

    #[test]
    fn legacy_project_dir_is_used_only_when_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let legacy = tmp.path().join(".coding-agent-lessons");
        std::fs::create_dir_all(&legacy).unwrap();
        let p = RecallPaths::discover(tmp.path().join("base"), tmp.path());
        assert_eq!(p.project_data_dir, legacy);

        std::fs::create_dir_all(tmp.path().join(".recall")).unwrap();
        let p = RecallPaths::discover(tmp.path().join("base"), tmp.path());
        assert_eq!(p.project_data_dir, tmp.path().join(".recall"));
    }

    #[test]
    fn with_state_dir_moves_log() {
        let p = RecallPaths::discover("/b", "/r").with_state_dir("/s");
        assert_eq!(p.log_path, PathBuf::from("/s/debug.log"));
        let p = p.with_log_path("/elsewhere/events.log");
        assert_eq!(p.log_path, PathBuf::from("/elsewhere/events.log"));
        assert_eq!(p.state_dir, PathBuf::from("/s"));
    }

    #[test]
    fn session_stem_sanitizes() {
        assert_eq!(session_file_stem("test-123"), "test-123");
        let hashed = session_file_stem("../../etc/passwd");
        assert!(hashed.starts_with("h_"));
        assert!(!hashed.contains('/'));
        assert_eq!(hashed, session_file_stem("../../etc/passwd"));
        assert_ne!(hashed, session_file_stem("../../etc/shadow"));
    }

    #[test]
    fn lock_path_is_sidecar() {
        assert_eq!(
            lock_path_for(Path::new("/x/lessons.json")),
            PathBuf::from("/x/lessons.json.lock")
        );
    }

    #[test]
    fn base_dir_prefers_recall_base_then_legacy() {
        let dir = base_dir_from(|k| match k {
            "RECALL_BASE" => Some("/new".into()),
            "LESSONS_BASE" => Some("/old".into()),
            _ => None,
        });
        assert_eq!(dir, PathBuf::from("/new"));
        let dir = base_dir_from(|k| (k == "LESSONS_BASE").then(|| "/old".to_string()));
        assert_eq!(dir, PathBuf::from("/old"));
    }

    #[test]
    fn empty_recall_base_falls_through_to_legacy() {
        let dir = base_dir_from(|k| match k {
            "RECALL_BASE" => Some(String::new()),
            "LESSONS_BASE" => Some("/old".into()),
            _ => None,
        });
        assert_eq!(dir, PathBuf::from("/old"));

        let dir = base_dir_from(|k| (k == "RECALL_BASE").then(|| "  ".to_string()));
        assert!(dir.ends_with("coding-agent-lessons") || dir.ends_with(".coding-agent-lessons"));
    }

    #[test]
    fn default_state_dir_is_claude_recall() {
        if let Some(dir) = default_state_dir() {
            assert!(dir.ends_with("claude-recall"));
        }
    }

    #[test]
    fn ensure_layout_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let p = RecallPaths::discover(tmp.path().join("base"), tmp.path().join("repo"));
        p.ensure_layout().unwrap();
        assert!(p.citation_state_dir.is_dir());
        assert!(p.state_dir.is_dir());
        assert!(p.project_data_dir.is_dir());
    }
}
