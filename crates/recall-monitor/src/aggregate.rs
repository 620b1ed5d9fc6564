use std::collections::{BTreeMap, VecDeque};

use recall_core::{EventKind, EventRecord, Level, TierCounts};
use serde::Serialize;
use time::OffsetDateTime;

use crate::tailer::{ResetReason, TailEvent, TailStats};

/// Hook durations kept per hook for percentile estimates.
pub const DEFAULT_TIMING_SAMPLES: usize = 512;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub feed_capacity: usize,
    pub citation_window: time::Duration,
    pub timing_samples: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            feed_capacity: 500,
            citation_window: time::Duration::hours(1),
            timing_samples: DEFAULT_TIMING_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub project: Option<String>,
    pub pid: Option<u32>,
    /// `None` when the session's `session_start` predates what was read.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended: Option<OffsetDateTime>,
    pub total_lessons: u64,
    pub system_count: u64,
    pub project_count: u64,
    /// Lesson id -> citation events seen for it.
    pub citations: BTreeMap<String, u64>,
    pub hook_runs: u64,
    pub hook_ms: f64,
    pub events: u64,
    pub errors: u64,
}

impl SessionStats {
    fn new(session_id: &str, seen: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.to_string(),
            project: None,
            pid: None,
            started: None,
            last_seen: seen,
            ended: None,
            total_lessons: 0,
            system_count: 0,
            project_count: 0,
            citations: BTreeMap::new(),
            hook_runs: 0,
            hook_ms: 0.0,
            events: 0,
            errors: 0,
        }
    }

    pub fn citation_count(&self) -> u64 {
        self.citations.values().sum()
    }

    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectStats {
    pub sessions: u64,
    pub citations: u64,
    pub events: u64,
    pub hook_runs: u64,
    /// Lesson total declared by the latest session start in this project.
    pub lessons_available: u64,
}

impl ProjectStats {
    pub fn citation_rate(&self) -> f64 {
        rate(self.citations, self.lessons_available)
    }
}

/// Bounded window of recent durations for one hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookTiming {
    pub hook: String,
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    pub samples: VecDeque<f64>,
}

impl HookTiming {
    fn new(hook: &str) -> Self {
        Self {
            hook: hook.to_string(),
            count: 0,
            total_ms: 0.0,
            max_ms: 0.0,
            samples: VecDeque::new(),
        }
    }

    fn record(&mut self, ms: f64, cap: usize) {
        self.count += 1;
        self.total_ms += ms;
        self.max_ms = self.max_ms.max(ms);
        if self.samples.len() == cap.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(ms);
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    /// Nearest-rank percentile over the retained samples.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetMarker {
    pub reason: ResetReason,
    /// Timestamp of the last record read before the reset.
    #[serde(with = "time::serde::rfc3339::option")]
    pub after: Option<OffsetDateTime>,
    /// Records applied before the reset, across all earlier files.
    pub records_before: u64,
    pub sessions_cleared: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEntry {
    Record(EventRecord),
    Reset(ResetMarker),
}

/// Counters that survive log discontinuities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub records: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub citations: u64,
    pub hook_runs: u64,
    pub decay_runs: u64,
    pub error_events: u64,
    pub unknown_kinds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecaySummary {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub scanned: u64,
    pub decayed: u64,
    pub promoted: u64,
    pub reactivated: u64,
}

/// Immutable picture of everything the aggregator knows, published once per
/// tick for readers.
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    pub sessions: BTreeMap<String, SessionStats>,
    pub projects: BTreeMap<String, ProjectStats>,
    pub hooks: BTreeMap<String, HookTiming>,
    pub feed: Vec<FeedEntry>,
    pub resets: Vec<ResetMarker>,
    pub totals: Totals,
    pub lessons_available: u64,
    pub citations_in_window: u64,
    pub citation_window: time::Duration,
    pub latest: Option<OffsetDateTime>,
    pub last_decay: Option<DecaySummary>,
    pub tail: TailStats,
    pub offset: u64,
    /// Tier counts read from the lesson stores, when a census source is set.
    pub census: Option<TierCounts>,
    pub tail_error: Option<TailFault>,
}

impl AggregateSnapshot {
    pub fn cumulative_citation_rate(&self) -> f64 {
        rate(self.totals.citations, self.lessons_available)
    }

    pub fn windowed_citation_rate(&self) -> f64 {
        rate(self.citations_in_window, self.lessons_available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailFault {
    pub message: String,
    /// The tailer has stopped; data is stale until restart.
    pub fatal: bool,
}

fn rate(citations: u64, lessons: u64) -> f64 {
    if lessons == 0 {
        0.0
    } else {
        citations as f64 / lessons as f64
    }
}

/// Folds tailed records into per-session, per-project and global statistics.
///
/// Time windows are anchored at the newest record timestamp rather than the
/// wall clock, so replaying the same log always yields the same state.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    sessions: BTreeMap<String, SessionStats>,
    projects: BTreeMap<String, ProjectStats>,
    hooks: BTreeMap<String, HookTiming>,
    feed: VecDeque<FeedEntry>,
    resets: Vec<ResetMarker>,
    totals: Totals,
    lessons_available: u64,
    citation_times: VecDeque<OffsetDateTime>,
    latest: Option<OffsetDateTime>,
    last_decay: Option<DecaySummary>,
    tail: TailStats,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            sessions: BTreeMap::new(),
            projects: BTreeMap::new(),
            hooks: BTreeMap::new(),
            feed: VecDeque::new(),
            resets: Vec::new(),
            totals: Totals::default(),
            lessons_available: 0,
            citation_times: VecDeque::new(),
            latest: None,
            last_decay: None,
            tail: TailStats::default(),
        }
    }

    pub fn apply(&mut self, event: TailEvent) {
        match event {
            TailEvent::Record(record) => self.apply_record(record),
            TailEvent::Reset(reason) => self.reset(reason),
        }
    }

    pub fn set_tail_stats(&mut self, stats: TailStats) {
        self.tail = stats;
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn apply_record(&mut self, record: EventRecord) {
        let ts = record.timestamp;
        self.totals.records += 1;
        self.latest = Some(self.latest.map_or(ts, |l| l.max(ts)));
        if record.level == Level::Error {
            self.totals.error_events += 1;
        }

        let project = record.project.clone();
        if let Some(name) = &project {
            self.projects.entry(name.clone()).or_default().events += 1;
        }

        let session = record.session_id.as_deref().map(|id| {
            let s = self
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| SessionStats::new(id, ts));
            s.last_seen = s.last_seen.max(ts);
            s.events += 1;
            if record.level == Level::Error {
                s.errors += 1;
            }
            if s.project.is_none() {
                s.project = project.clone();
            }
            if s.pid.is_none() {
                s.pid = record.pid;
            }
            s
        });

        match &record.kind {
            EventKind::SessionStart {
                total_lessons,
                system_count,
                project_count,
            } => {
                self.totals.sessions_started += 1;
                self.lessons_available = *total_lessons;
                if let Some(s) = session {
                    s.started = Some(ts);
                    s.ended = None;
                    s.total_lessons = *total_lessons;
                    s.system_count = *system_count;
                    s.project_count = *project_count;
                }
                if let Some(name) = &project {
                    let p = self.projects.entry(name.clone()).or_default();
                    p.sessions += 1;
                    p.lessons_available = *total_lessons;
                }
            }
            EventKind::SessionEnd => {
                self.totals.sessions_ended += 1;
                if let Some(s) = session {
                    s.ended = Some(ts);
                }
            }
            EventKind::Citation { lesson_id, .. } => {
                self.totals.citations += 1;
                if let Some(s) = session {
                    *s.citations.entry(lesson_id.clone()).or_default() += 1;
                }
                if let Some(name) = &project {
                    self.projects.entry(name.clone()).or_default().citations += 1;
                }
                self.citation_times.push_back(ts);
            }
            EventKind::HookEnd { hook, total_ms } => {
                self.totals.hook_runs += 1;
                let ms = if total_ms.is_finite() { total_ms.max(0.0) } else { 0.0 };
                self.hooks
                    .entry(hook.clone())
                    .or_insert_with(|| HookTiming::new(hook))
                    .record(ms, self.config.timing_samples);
                if let Some(s) = session {
                    s.hook_runs += 1;
                    s.hook_ms += ms;
                }
                if let Some(name) = &project {
                    self.projects.entry(name.clone()).or_default().hook_runs += 1;
                }
            }
            EventKind::DecayResult {
                scanned,
                decayed,
                promoted,
                reactivated,
            } => {
                self.totals.decay_runs += 1;
                self.last_decay = Some(DecaySummary {
                    at: ts,
                    scanned: *scanned,
                    decayed: *decayed,
                    promoted: *promoted,
                    reactivated: *reactivated,
                });
            }
            EventKind::Other => self.totals.unknown_kinds += 1,
            EventKind::HookStart { .. } | EventKind::Error { .. } => {}
        }

        self.trim_window();
        self.push_feed(FeedEntry::Record(record));
    }

    /// Handle a log discontinuity: session-scoped state goes, cumulative
    /// totals stay, and a marker is left in the feed.
    pub fn reset(&mut self, reason: ResetReason) {
        let marker = ResetMarker {
            reason,
            after: self.latest,
            records_before: self.totals.records,
            sessions_cleared: self.sessions.len(),
        };
        tracing::info!(
            reason = reason.as_str(),
            sessions_cleared = marker.sessions_cleared,
            "event log reset"
        );
        self.sessions.clear();
        self.citation_times.clear();
        self.latest = None;
        self.resets.push(marker.clone());
        self.push_feed(FeedEntry::Reset(marker));
    }

    fn push_feed(&mut self, entry: FeedEntry) {
        let cap = self.config.feed_capacity.max(1);
        while self.feed.len() >= cap {
            self.feed.pop_front();
        }
        self.feed.push_back(entry);
    }

    fn trim_window(&mut self) {
        let Some(latest) = self.latest else { return };
        let cutoff = recall_core::ts::saturating_sub(latest, self.config.citation_window);
        while self.citation_times.front().is_some_and(|t| *t < cutoff) {
            self.citation_times.pop_front();
        }
    }

    fn citations_in_window(&self) -> u64 {
        let Some(latest) = self.latest else { return 0 };
        let cutoff = recall_core::ts::saturating_sub(latest, self.config.citation_window);
        // Records are not strictly ordered; count rather than trust the front.
        self.citation_times.iter().filter(|t| **t >= cutoff).count() as u64
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            sessions: self.sessions.clone(),
            projects: self.projects.clone(),
            hooks: self.hooks.clone(),
            feed: self.feed.iter().cloned().collect(),
            resets: self.resets.clone(),
            totals: self.totals,
            lessons_available: self.lessons_available,
            citations_in_window: self.citations_in_window(),
            citation_window: self.config.citation_window,
            latest: self.latest,
            last_decay: self.last_decay,
            tail: self.tail,
            offset: 0,
            census: None,
            tail_error: None,
        }
    }
}
