use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Severity attached to every log line. Unrecognized names read as
/// [`Level::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Unknown,
}

impl From<String> for Level {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Unknown,
        }
    }
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Unknown => "unknown",
        }
    }
}

/// Kind-specific part of an event, keyed by the `event` field.
///
/// Unknown kinds parse as [`EventKind::Other`] so that newer producers never
/// break older readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    SessionStart {
        #[serde(default)]
        total_lessons: u64,
        #[serde(default)]
        system_count: u64,
        #[serde(default)]
        project_count: u64,
    },
    SessionEnd,
    Citation {
        lesson_id: String,
        #[serde(default)]
        uses_before: u64,
        #[serde(default)]
        uses_after: u64,
    },
    HookStart {
        hook: String,
    },
    HookEnd {
        hook: String,
        total_ms: f64,
    },
    DecayResult {
        #[serde(default)]
        scanned: u64,
        #[serde(default)]
        decayed: u64,
        #[serde(default)]
        promoted: u64,
        #[serde(default)]
        reactivated: u64,
    },
    Error {
        #[serde(default)]
        op: String,
        #[serde(default)]
        err: String,
    },
    #[serde(other)]
    Other,
}

impl EventKind {
    /// Wire name of the kind (the `event` field).
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SessionStart { .. } => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::Citation { .. } => "citation",
            EventKind::HookStart { .. } => "hook_start",
            EventKind::HookEnd { .. } => "hook_end",
            EventKind::DecayResult { .. } => "decay_result",
            EventKind::Error { .. } => "error",
            EventKind::Other => "other",
        }
    }
}

/// A single event log record (one JSONL line in the debug log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub level: Level,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl EventRecord {
    pub fn new(kind: EventKind, timestamp: OffsetDateTime) -> Self {
        let level = match kind {
            EventKind::Error { .. } => Level::Error,
            _ => Level::Info,
        };
        Self {
            kind,
            level,
            timestamp,
            session_id: None,
            pid: None,
            project: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Parse one log line. Surrounding whitespace (including `\r`) is ignored.
    pub fn parse_line(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line.trim_ascii())
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
