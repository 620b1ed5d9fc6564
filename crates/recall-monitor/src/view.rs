//! Read-only queries over an [`AggregateSnapshot`] for rendering layers.

use std::sync::Arc;

use recall_core::TierCounts;
use serde::Serialize;
use time::OffsetDateTime;

use crate::aggregate::{
    AggregateSnapshot, DecaySummary, FeedEntry, ProjectStats, ResetMarker, SessionStats,
    TailFault, Totals,
};
use crate::tailer::TailStats;

/// Percentiles reported by [`DashboardViewModel::timing_chart`].
pub const CHART_PERCENTILES: [f64; 5] = [50.0, 75.0, 90.0, 95.0, 99.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    /// Sessions seen since the last log reset.
    pub sessions: usize,
    pub open_sessions: usize,
    pub lessons: TierCounts,
    /// Whether `lessons` came from the stores or only from declared totals.
    pub lessons_from_census: bool,
    pub citations: u64,
    pub citation_rate: f64,
    pub windowed_citation_rate: f64,
    pub window_minutes: i64,
    pub records: u64,
    pub malformed: u64,
    pub resets: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event: Option<OffsetDateTime>,
    pub last_decay: Option<DecaySummary>,
    pub tail_error: Option<TailFault>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub citation_count: u64,
    pub distinct_lessons: usize,
    pub mean_hook_ms: f64,
    /// Seconds between start (or first sighting) and end (or last sighting).
    pub duration_secs: i64,
}

impl SessionSummary {
    fn from_stats(stats: &SessionStats) -> Self {
        let citation_count = stats.citation_count();
        let mean_hook_ms = if stats.hook_runs == 0 {
            0.0
        } else {
            stats.hook_ms / stats.hook_runs as f64
        };
        let from = stats.started.unwrap_or(stats.last_seen);
        let to = stats.ended.unwrap_or(stats.last_seen);
        Self {
            citation_count,
            distinct_lessons: stats.citations.len(),
            mean_hook_ms,
            duration_secs: (to - from).whole_seconds().max(0),
            stats: stats.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingChart {
    pub hook: String,
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
    /// `(percentile, ms)` pairs in ascending percentile order.
    pub percentiles: Vec<(f64, f64)>,
    /// Retained samples, oldest first.
    pub recent: Vec<f64>,
}

impl TimingChart {
    pub fn at(&self, percentile: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(p, _)| (*p - percentile).abs() < f64::EPSILON)
            .map(|(_, ms)| *ms)
    }
}

/// State-tab details: where the tailer is and what it has seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TailState {
    pub offset: u64,
    pub tail: TailStats,
    pub totals: Totals,
    pub resets: Vec<ResetMarker>,
    pub tail_error: Option<TailFault>,
}

/// Synchronous, side-effect-free query surface over one snapshot.
#[derive(Debug, Clone)]
pub struct DashboardViewModel {
    snapshot: Arc<AggregateSnapshot>,
}

impl DashboardViewModel {
    pub fn new(snapshot: Arc<AggregateSnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &AggregateSnapshot {
        &self.snapshot
    }

    /// The most recent `limit` feed entries, oldest first.
    pub fn live_feed(&self, limit: usize) -> Vec<FeedEntry> {
        let feed = &self.snapshot.feed;
        feed[feed.len().saturating_sub(limit)..].to_vec()
    }

    pub fn health_summary(&self) -> HealthSummary {
        let snap = &self.snapshot;
        let (lessons, lessons_from_census) = match snap.census {
            Some(counts) => (counts, true),
            None => (
                TierCounts {
                    total: snap.lessons_available,
                    ..TierCounts::default()
                },
                false,
            ),
        };
        HealthSummary {
            sessions: snap.sessions.len(),
            open_sessions: snap.sessions.values().filter(|s| s.is_open()).count(),
            lessons,
            lessons_from_census,
            citations: snap.totals.citations,
            citation_rate: snap.cumulative_citation_rate(),
            windowed_citation_rate: snap.windowed_citation_rate(),
            window_minutes: snap.citation_window.whole_minutes(),
            records: snap.totals.records,
            malformed: snap.tail.malformed,
            resets: snap.resets.len(),
            last_event: snap.latest,
            last_decay: snap.last_decay,
            tail_error: snap.tail_error.clone(),
        }
    }

    pub fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.snapshot
            .sessions
            .get(session_id)
            .map(SessionSummary::from_stats)
    }

    /// Every known session, most recently active first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut out: Vec<_> = self
            .snapshot
            .sessions
            .values()
            .map(SessionSummary::from_stats)
            .collect();
        out.sort_by(|a, b| b.stats.last_seen.cmp(&a.stats.last_seen));
        out
    }

    pub fn projects(&self) -> Vec<(String, ProjectStats)> {
        self.snapshot
            .projects
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect()
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.snapshot.hooks.keys().cloned().collect()
    }

    pub fn timing_chart(&self, hook: &str) -> Option<TimingChart> {
        let timing = self.snapshot.hooks.get(hook)?;
        let percentiles = CHART_PERCENTILES
            .iter()
            .filter_map(|p| timing.percentile(*p).map(|ms| (*p, ms)))
            .collect();
        Some(TimingChart {
            hook: timing.hook.clone(),
            count: timing.count,
            mean_ms: timing.mean_ms(),
            max_ms: timing.max_ms,
            percentiles,
            recent: timing.samples.iter().copied().collect(),
        })
    }

    pub fn tail_state(&self) -> TailState {
        let snap = &self.snapshot;
        TailState {
            offset: snap.offset,
            tail: snap.tail,
            totals: snap.totals,
            resets: snap.resets.clone(),
            tail_error: snap.tail_error.clone(),
        }
    }
}
