use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use recall_core::TierCounts;

use crate::aggregate::{AggregateSnapshot, Aggregator, AggregatorConfig, TailFault};
use crate::tailer::{LogTailer, TailError, TailEvent};
use crate::view::DashboardViewModel;

/// Cold-start replay gives up after this many bounded reads.
const MAX_REPLAY_POLLS: usize = 100_000;

/// Anything that can count lessons by tier.
pub trait CensusSource: Send {
    fn census(&self) -> anyhow::Result<TierCounts>;
}

impl<F> CensusSource for F
where
    F: Fn() -> anyhow::Result<TierCounts> + Send,
{
    fn census(&self) -> anyhow::Result<TierCounts> {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub tick: Duration,
    pub aggregator: AggregatorConfig,
    /// Refresh the lesson census every this many ticks.
    pub census_every: u64,
    pub max_read: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            aggregator: AggregatorConfig::default(),
            census_every: 10,
            max_read: crate::tailer::DEFAULT_MAX_READ,
        }
    }
}

/// Latest published snapshot, shared between the polling loop and readers.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell(Arc<RwLock<Arc<AggregateSnapshot>>>);

impl SnapshotCell {
    pub fn load(&self) -> Arc<AggregateSnapshot> {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn store(&self, snapshot: AggregateSnapshot) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }

    pub fn view(&self) -> DashboardViewModel {
        DashboardViewModel::new(self.load())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub records: usize,
    pub resets: usize,
}

/// Drives the tailer and aggregator on a fixed tick and publishes a fresh
/// snapshot after every tick.
pub struct Monitor {
    tailer: LogTailer,
    aggregator: Aggregator,
    census: Option<Box<dyn CensusSource>>,
    last_census: Option<TierCounts>,
    fault: Option<TailFault>,
    options: MonitorOptions,
    ticks: u64,
    cell: SnapshotCell,
}

impl Monitor {
    pub fn new(log_path: impl Into<PathBuf>, options: MonitorOptions) -> Self {
        Self {
            tailer: LogTailer::new(log_path).with_max_read(options.max_read),
            aggregator: Aggregator::new(options.aggregator.clone()),
            census: None,
            last_census: None,
            fault: None,
            options,
            ticks: 0,
            cell: SnapshotCell::default(),
        }
    }

    pub fn with_census(mut self, source: impl CensusSource + 'static) -> Self {
        self.census = Some(Box::new(source));
        self
    }

    pub fn cell(&self) -> SnapshotCell {
        self.cell.clone()
    }

    pub fn view(&self) -> DashboardViewModel {
        self.cell.view()
    }

    pub fn fault(&self) -> Option<&TailFault> {
        self.fault.as_ref()
    }

    /// Read the log from offset 0 until caught up, then publish.
    ///
    /// Must run before the first [`tick`](Self::tick); state is rebuilt from
    /// the log alone.
    pub fn replay(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for _ in 0..MAX_REPLAY_POLLS {
            let before = self.tailer.offset();
            let step = self.pump();
            report.records += step.records;
            report.resets += step.resets;
            if self.fault.is_some() || (self.tailer.offset() == before && step.resets == 0) {
                break;
            }
        }
        self.refresh_census();
        self.publish();
        tracing::info!(
            path = %self.tailer.path().display(),
            records = report.records,
            offset = self.tailer.offset(),
            "event log replayed"
        );
        report
    }

    /// One poll of the tailer; a stopped tailer leaves the data stale.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let report = if self.fault.as_ref().is_some_and(|f| f.fatal) {
            TickReport::default()
        } else {
            self.pump()
        };
        if self.options.census_every > 0 && self.ticks % self.options.census_every == 0 {
            self.refresh_census();
        }
        self.publish();
        report
    }

    fn pump(&mut self) -> TickReport {
        let mut report = TickReport::default();
        match self.tailer.poll() {
            Ok(events) => {
                self.fault = None;
                for event in events {
                    match event {
                        TailEvent::Reset(_) => report.resets += 1,
                        TailEvent::Record(_) => report.records += 1,
                    }
                    self.aggregator.apply(event);
                }
            }
            Err(e) => self.record_fault(&e),
        }
        self.aggregator.set_tail_stats(self.tailer.stats());
        report
    }

    fn record_fault(&mut self, e: &TailError) {
        let fatal = e.is_fatal();
        if fatal {
            tracing::error!(error = %e, "event log tailer stopped");
        } else {
            tracing::warn!(error = %e, "event log read failed; retrying next tick");
        }
        self.fault = Some(TailFault {
            message: e.to_string(),
            fatal,
        });
    }

    fn refresh_census(&mut self) {
        let Some(source) = &self.census else { return };
        match source.census() {
            Ok(counts) => self.last_census = Some(counts),
            Err(e) => tracing::warn!(error = %e, "lesson census failed"),
        }
    }

    fn publish(&self) {
        let mut snapshot = self.aggregator.snapshot();
        snapshot.offset = self.tailer.offset();
        snapshot.census = self.last_census;
        snapshot.tail_error = self.fault.clone();
        self.cell.store(snapshot);
    }

    /// Replay, then keep ticking on a background thread until stopped.
    pub fn spawn(mut self) -> std::io::Result<MonitorHandle> {
        self.replay();
        let cell = self.cell();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("recall-monitor".into())
            .spawn(move || {
                let tick = self.options.tick;
                while !flag.load(Ordering::Relaxed) {
                    self.tick();
                    sleep_unless_stopped(tick, &flag);
                }
            })?;
        Ok(MonitorHandle {
            cell,
            stop,
            thread: Some(thread),
        })
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(25);
    let mut waited = Duration::ZERO;
    while waited < total && !stop.load(Ordering::Relaxed) {
        let nap = step.min(total - waited);
        std::thread::sleep(nap);
        waited += nap;
    }
}

/// Running monitor. Dropping it stops the loop; reads in flight are abandoned.
pub struct MonitorHandle {
    cell: SnapshotCell,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn view(&self) -> DashboardViewModel {
        self.cell.view()
    }

    pub fn cell(&self) -> SnapshotCell {
        self.cell.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{EventKind, EventRecord};
    use recall_store::append_event;
    use std::path::Path;
    use time::macros::datetime;

    fn write_scenario(path: &Path) {
        let t = datetime!(2026-01-06 10:00:00 UTC);
        let records = [
            EventRecord::new(
                EventKind::SessionStart {
                    total_lessons: 5,
                    system_count: 2,
                    project_count: 3,
                },
                t,
            ),
            EventRecord::new(
                EventKind::Citation {
                    lesson_id: "L001".into(),
                    uses_before: 5,
                    uses_after: 6,
                },
                t,
            ),
            EventRecord::new(
                EventKind::HookEnd {
                    hook: "SessionStart".into(),
                    total_ms: 45.5,
                },
                t,
            ),
        ];
        for r in records {
            append_event(path, &r.with_session("test-123")).unwrap();
        }
    }

    #[test]
    fn replay_rebuilds_state_from_the_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        write_scenario(&log);

        let mut monitor = Monitor::new(&log, MonitorOptions::default());
        let report = monitor.replay();
        assert_eq!(report.records, 3);

        let view = monitor.view();
        assert!(view.health_summary().sessions >= 1);
        let session = view.session_summary("test-123").unwrap();
        assert_eq!(session.stats.citations.get("L001"), Some(&1));
        assert_eq!(view.snapshot().offset, std::fs::metadata(&log).unwrap().len());
    }

    #[test]
    fn replay_drains_in_bounded_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        for _ in 0..10 {
            write_scenario(&log);
        }
        let mut monitor = Monitor::new(
            &log,
            MonitorOptions {
                max_read: 400,
                ..MonitorOptions::default()
            },
        );
        assert_eq!(monitor.replay().records, 30);
    }

    #[test]
    fn tick_picks_up_appended_records() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        let mut monitor = Monitor::new(&log, MonitorOptions::default());
        assert_eq!(monitor.replay().records, 0);

        write_scenario(&log);
        assert_eq!(monitor.tick().records, 3);
        assert_eq!(monitor.tick().records, 0);
        assert_eq!(monitor.view().health_summary().citations, 1);
    }

    #[test]
    fn census_is_published() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        let mut monitor = Monitor::new(&log, MonitorOptions::default()).with_census(|| -> anyhow::Result<TierCounts> {
            Ok(TierCounts {
                total: 3,
                active: 1,
                decayed: 1,
                promoted: 1,
            })
        });
        monitor.replay();
        let health = monitor.view().health_summary();
        assert!(health.lessons_from_census);
        assert_eq!(health.lessons.promoted, 1);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_log_degrades_to_stale_data() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        write_scenario(&log);
        let mut monitor = Monitor::new(&log, MonitorOptions::default());
        monitor.replay();

        write_scenario(&log);
        std::fs::set_permissions(&log, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::File::open(&log).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }
        let report = monitor.tick();
        assert_eq!(report.records, 0);
        let health = monitor.view().health_summary();
        assert!(health.tail_error.as_ref().is_some_and(|f| f.fatal));
        assert_eq!(health.citations, 1);

        std::fs::set_permissions(&log, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(monitor.tick().records, 0);
    }

    #[test]
    fn spawned_monitor_stops_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("debug.log");
        write_scenario(&log);
        let handle = Monitor::new(
            &log,
            MonitorOptions {
                tick: Duration::from_millis(10),
                ..MonitorOptions::default()
            },
        )
        .spawn()
        .unwrap();
        assert_eq!(handle.view().health_summary().records, 3);
        handle.stop();
    }
}
