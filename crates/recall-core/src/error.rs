use std::path::PathBuf;

/// Errors surfaced by the citation and decay engines.
///
/// Persistence failures are always reported to the caller; the engines never
/// retry a usage-count write behind the caller's back.
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("lesson not found: {id}")]
    LessonNotFound { id: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to persist {what}: {reason}")]
    Persist { what: String, reason: String },

    #[error("could not lock {}: {reason}", path.display())]
    Lock { path: PathBuf, reason: String },

    #[error("invalid timestamp {value:?}: expected RFC 3339")]
    InvalidTimestamp { value: String },
}

impl RecallError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a failed write (usually an `anyhow` chain from the store helpers).
    pub fn persist(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Persist {
            what: what.into(),
            reason: format!("{err:#}"),
        }
    }
}

pub type RecallResult<T> = Result<T, RecallError>;
