use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use recall_core::EventRecord;
use serde::Serialize;

/// Upper bound on bytes consumed by a single poll.
pub const DEFAULT_MAX_READ: u64 = 4 * 1024 * 1024; // 4MB

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("permission denied reading {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TailError {
    fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }

    /// Fatal errors stop the tailer; anything else is retried next poll.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// The file got shorter than what was already read.
    Truncated,
    /// A different file now lives at the path.
    Rotated,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::Rotated => "rotated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    Record(EventRecord),
    /// Reading restarted at offset 0. Everything after this comes from the
    /// new file.
    Reset(ResetReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TailStats {
    pub records: u64,
    pub malformed: u64,
    pub resets: u64,
    pub bytes_read: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

/// Incremental reader over a growing line-oriented event log.
///
/// Each [`poll`](LogTailer::poll) reads at most `max_read` bytes past the
/// current offset and only consumes complete lines; an unterminated tail is
/// left for the next poll. Shrinking or replacement of the file resets the
/// offset to 0 and yields [`TailEvent::Reset`] before any record of the new
/// file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    known_size: u64,
    identity: Option<FileIdentity>,
    max_read: u64,
    /// Inside a line longer than `max_read`; skip through its terminator.
    discarding: bool,
    stats: TailStats,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_offset(path, 0)
    }

    pub fn from_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            known_size: 0,
            identity: None,
            max_read: DEFAULT_MAX_READ,
            discarding: false,
            stats: TailStats::default(),
        }
    }

    pub fn with_max_read(mut self, max_read: u64) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn stats(&self) -> TailStats {
        self.stats
    }

    /// Read whatever complete lines were appended since the last poll.
    ///
    /// A missing file is "no new data". Permission errors are returned as
    /// [`TailError::PermissionDenied`]; callers should treat them as fatal.
    pub fn poll(&mut self) -> Result<Vec<TailEvent>, TailError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TailError::from_io(&self.path, e)),
        };
        self.poll_file(file)
    }

    /// Identity, size and data all come from the one open handle, so a
    /// rotation racing with the poll is picked up whole on the next poll.
    fn poll_file(&mut self, mut file: File) -> Result<Vec<TailEvent>, TailError> {
        let meta = file
            .metadata()
            .map_err(|e| TailError::from_io(&self.path, e))?;

        let mut events = Vec::new();
        let identity = FileIdentity::of(&meta);
        let size = meta.len();

        let reason = if self.identity.is_some_and(|known| known != identity) {
            Some(ResetReason::Rotated)
        } else if size < self.offset || size < self.known_size {
            Some(ResetReason::Truncated)
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::debug!(
                path = %self.path.display(),
                from_offset = self.offset,
                size,
                reason = reason.as_str(),
                "event log discontinuity"
            );
            self.offset = 0;
            self.discarding = false;
            self.stats.resets += 1;
            events.push(TailEvent::Reset(reason));
        }
        self.identity = Some(identity);
        self.known_size = size;

        if size <= self.offset {
            return Ok(events);
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| TailError::from_io(&self.path, e))?;

        let to_read = (size - self.offset).min(self.max_read);
        let mut buf = Vec::with_capacity(to_read as usize);
        file.take(to_read)
            .read_to_end(&mut buf)
            .map_err(|e| TailError::from_io(&self.path, e))?;

        let consumed = self.consume(&buf, &mut events);
        self.offset += consumed as u64;
        self.stats.bytes_read += consumed as u64;
        Ok(events)
    }

    /// Parse complete lines out of `buf`; returns how many bytes were used.
    fn consume(&mut self, buf: &[u8], events: &mut Vec<TailEvent>) -> usize {
        let mut pos = 0;

        if self.discarding {
            match buf.iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    pos = nl + 1;
                    self.discarding = false;
                }
                None => return buf.len(),
            }
        }

        while let Some(nl) = buf[pos..].iter().position(|&b| b == b'\n') {
            let line = &buf[pos..pos + nl];
            pos += nl + 1;
            if line.trim_ascii().is_empty() {
                continue;
            }
            match EventRecord::parse_line(line) {
                Ok(record) => {
                    self.stats.records += 1;
                    events.push(TailEvent::Record(record));
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::debug!(error = %e, "skipping malformed event line");
                }
            }
        }

        // A full read with no terminator in sight: the line cannot fit in
        // one poll, so drop it instead of stalling on it forever.
        if pos == 0 && buf.len() as u64 >= self.max_read {
            self.stats.malformed += 1;
            self.discarding = true;
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                "discarding oversized event line"
            );
            return buf.len();
        }
        pos
    }
}
