use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use recall_core::{EventKind, EventRecord, TierCounts};
use recall_lessons::LessonStores;
use recall_monitor::{AggregatorConfig, FeedEntry, Monitor, MonitorOptions};
use recall_store::{RecallConfig, RecallPaths};

/// Monitor over the configured event log, with a lesson census from the
/// two stores.
pub fn monitor(config: &RecallConfig, paths: &RecallPaths) -> Monitor {
    let options = MonitorOptions {
        tick: config.tick(),
        aggregator: AggregatorConfig {
            feed_capacity: config.feed_capacity.max(1),
            citation_window: config.citation_window(),
            ..AggregatorConfig::default()
        },
        ..MonitorOptions::default()
    };
    let stores = LessonStores::json(paths);
    Monitor::new(&paths.log_path, options)
        .with_census(move || -> anyhow::Result<TierCounts> { Ok(stores.census()?) })
}

/// Launch the live dashboard.
///
/// With the `tui` feature (default) and without `--plain`: opens the
/// interactive ratatui UI. Otherwise prints new events to stdout.
pub fn execute(config: &RecallConfig, paths: &RecallPaths, plain: bool) -> anyhow::Result<()> {
    #[cfg(feature = "tui")]
    {
        if !plain {
            return crate::tui::run(monitor(config, paths), &paths.log_path, config.tick());
        }
    }
    #[cfg(not(feature = "tui"))]
    let _ = plain;

    run_plain(config, paths)
}

fn run_plain(config: &RecallConfig, paths: &RecallPaths) -> anyhow::Result<()> {
    let running = stop_on_ctrlc();

    eprintln!("recall watch (plain mode) on {}", paths.log_path.display());
    eprintln!("Press Ctrl-C to stop.\n");

    let mut monitor = monitor(config, paths);
    monitor.replay();
    for entry in monitor.view().live_feed(20) {
        println!("{}", feed_line(&entry));
    }

    let mut last_fault = None;
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(config.tick());
        let report = monitor.tick();
        for entry in monitor.view().live_feed(report.records + report.resets) {
            println!("{}", feed_line(&entry));
        }
        let fault = monitor.fault().map(|f| f.message.clone());
        if fault != last_fault {
            if let Some(msg) = &fault {
                eprintln!("tail error: {msg}");
            }
            last_fault = fault;
        }
    }
    Ok(())
}

/// Flag cleared by Ctrl-C. If the handler cannot be installed the flag stays
/// set and the failure is logged.
fn stop_on_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(false, Ordering::Relaxed);
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
        eprintln!("warning: Ctrl-C handler unavailable ({e}); stop with SIGTERM");
    }
    running
}

/// One-line rendering of a feed entry: `HH:MM:SS LEVEL event session detail`.
pub fn feed_line(entry: &FeedEntry) -> String {
    match entry {
        FeedEntry::Record(r) => {
            let session = r.session_id.as_deref().unwrap_or("-");
            format!(
                "{}  {:<5} {:<13} {:<8.8}  {}",
                recall_core::ts::clock(r.timestamp),
                r.level.as_str().to_uppercase(),
                r.kind.name(),
                session,
                event_detail(r)
            )
        }
        FeedEntry::Reset(m) => format!(
            "---- log {}: {} session(s) cleared, {} records before ----",
            m.reason.as_str(),
            m.sessions_cleared,
            m.records_before
        ),
    }
}

/// Kind-specific summary of a record.
pub fn event_detail(record: &EventRecord) -> String {
    match &record.kind {
        EventKind::SessionStart {
            total_lessons,
            system_count,
            project_count,
        } => format!("{total_lessons} lessons ({system_count} system, {project_count} project)"),
        EventKind::SessionEnd => String::new(),
        EventKind::Citation {
            lesson_id,
            uses_before,
            uses_after,
        } => format!("{lesson_id} {uses_before} -> {uses_after}"),
        EventKind::HookStart { hook } => hook.clone(),
        EventKind::HookEnd { hook, total_ms } => format!("{hook} {total_ms:.1}ms"),
        EventKind::DecayResult {
            scanned,
            decayed,
            promoted,
            reactivated,
        } => format!(
            "scanned {scanned}, decayed {decayed}, promoted {promoted}, reactivated {reactivated}"
        ),
        EventKind::Error { op, err } => format!("{op}: {err}"),
        EventKind::Other => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_monitor::{ResetMarker, ResetReason};
    use time::macros::datetime;

    #[test]
    fn citation_line_shows_counts() {
        let record = EventRecord::new(
            EventKind::Citation {
                lesson_id: "L001".into(),
                uses_before: 5,
                uses_after: 6,
            },
            datetime!(2026-01-06 10:00:07 UTC),
        )
        .with_session("test-123456789");
        let line = feed_line(&FeedEntry::Record(record));
        assert!(line.starts_with("10:00:07  INFO  citation"));
        assert!(line.contains("test-123 "));
        assert!(line.ends_with("L001 5 -> 6"));
    }

    #[test]
    fn reset_line_is_a_marker() {
        let line = feed_line(&FeedEntry::Reset(ResetMarker {
            reason: ResetReason::Truncated,
            after: None,
            records_before: 12,
            sessions_cleared: 2,
        }));
        assert!(line.contains("log truncated"));
        assert!(line.contains("2 session(s) cleared"));
    }

    #[test]
    fn second_ctrlc_install_is_not_fatal() {
        let first = stop_on_ctrlc();
        let second = stop_on_ctrlc();
        assert!(first.load(Ordering::Relaxed));
        assert!(second.load(Ordering::Relaxed));
    }

    #[test]
    fn hook_end_detail_has_duration() {
        let record = EventRecord::new(
            EventKind::HookEnd {
                hook: "SessionStart".into(),
                total_ms: 45.5,
            },
            datetime!(2026-01-06 10:00:00 UTC),
        );
        assert_eq!(event_detail(&record), "SessionStart 45.5ms");
    }
}
