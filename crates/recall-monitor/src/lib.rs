//! Live view over the recall event log.
//!
//! A [`LogTailer`] reads newly appended lines, an [`Aggregator`] folds them
//! into statistics, and a [`Monitor`] drives both on a fixed tick, publishing
//! an [`AggregateSnapshot`] that the [`DashboardViewModel`] queries.

pub mod aggregate;
pub mod monitor;
pub mod tailer;
pub mod view;

pub use aggregate::{
    AggregateSnapshot, Aggregator, AggregatorConfig, FeedEntry, HookTiming, ProjectStats,
    ResetMarker, SessionStats, TailFault, Totals,
};
pub use monitor::{CensusSource, Monitor, MonitorHandle, MonitorOptions, SnapshotCell, TickReport};
pub use tailer::{LogTailer, ResetReason, TailError, TailEvent, TailStats};
pub use view::{DashboardViewModel, HealthSummary, SessionSummary, TailState, TimingChart};
