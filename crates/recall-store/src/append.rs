use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use recall_core::EventRecord;

/// Append one record to the event log as a single whole line.
///
/// The line is written with one `write_all` on an `O_APPEND` handle while an
/// exclusive lock is held, so concurrent writers never interleave partial lines.
pub fn append_event(log_path: &Path, record: &EventRecord) -> anyhow::Result<()> {
    let mut line = record.to_line()?;
    line.push('\n');

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    file.lock_exclusive()?;
    let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    let _ = file.unlock();
    written?;
    tracing::trace!(event = record.kind.name(), path = %log_path.display(), "appended event");
    Ok(())
}
