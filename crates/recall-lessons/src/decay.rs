//! Usage-based tiering.
//!
//! A scan runs at most once per `min_interval`; the last run is kept in a
//! single RFC 3339 marker file. Tier decisions are a pure function of the
//! lesson's counters, its reference time and `now`, so re-running a scan on
//! unchanged data reproduces the same tiers.

use std::path::PathBuf;

use recall_core::{Lesson, RecallError, RecallResult, Scope, Tier};
use recall_store::RecallConfig;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::store::LessonStores;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayPolicy {
    /// Minimum time between two scans.
    pub min_interval: Duration,
    /// Lessons whose reference time is older than this decay.
    pub decay_after: Duration,
    /// Promotion needs at least this many citations (0 disables promotion)...
    pub promote_threshold: u64,
    /// ...and a citation no older than this.
    pub promote_window: Duration,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self::from_config(&RecallConfig::default())
    }
}

impl DecayPolicy {
    pub fn from_config(config: &RecallConfig) -> Self {
        Self {
            min_interval: config.decay_interval(),
            decay_after: config.decay_after(),
            promote_threshold: config.promote_threshold,
            promote_window: config.promote_window(),
        }
    }
}

/// Tier a lesson should have at `now`.
///
/// Promotion wins over decay, and a promoted lesson is never decayed. Apart
/// from that the current tier is ignored, so a decayed lesson that has been
/// cited again comes back as active.
pub fn evaluate(lesson: &Lesson, now: OffsetDateTime, policy: &DecayPolicy) -> Tier {
    let promote = policy.promote_threshold > 0
        && lesson.uses >= policy.promote_threshold
        && lesson
            .last_cited
            .is_some_and(|t| now - t <= policy.promote_window);
    if promote || lesson.tier == Tier::Promoted {
        return Tier::Promoted;
    }
    if now - lesson.reference_time() > policy.decay_after {
        Tier::Decayed
    } else {
        Tier::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierChange {
    pub lesson_id: String,
    pub scope: Scope,
    pub from: Tier,
    pub to: Tier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    #[serde(with = "time::serde::rfc3339")]
    pub ran_at: OffsetDateTime,
    pub scanned: u64,
    pub decayed: u64,
    pub promoted: u64,
    pub reactivated: u64,
    pub changes: Vec<TierChange>,
}

impl DecayReport {
    fn new(ran_at: OffsetDateTime) -> Self {
        Self {
            ran_at,
            scanned: 0,
            decayed: 0,
            promoted: 0,
            reactivated: 0,
            changes: Vec::new(),
        }
    }

    fn record(&mut self, change: TierChange) {
        match change.to {
            Tier::Decayed => self.decayed += 1,
            Tier::Promoted => self.promoted += 1,
            Tier::Active => self.reactivated += 1,
        }
        self.changes.push(change);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecayOutcome {
    /// Not due yet; nothing was read or written.
    Skipped {
        last_run: OffsetDateTime,
        next_due: OffsetDateTime,
    },
    Ran(DecayReport),
}

pub struct DecayEngine {
    state_path: PathBuf,
    lock_path: PathBuf,
    policy: DecayPolicy,
    stores: LessonStores,
}

impl DecayEngine {
    pub fn new(
        state_path: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        policy: DecayPolicy,
        stores: LessonStores,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            lock_path: lock_path.into(),
            policy,
            stores,
        }
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.policy
    }

    /// Persisted last-run time. A marker that can't be parsed counts as
    /// "never ran".
    pub fn last_run(&self) -> RecallResult<Option<OffsetDateTime>> {
        match std::fs::read_to_string(&self.state_path) {
            Ok(content) => match recall_core::ts::parse_rfc3339_strict(&content) {
                Ok(t) => Ok(Some(t)),
                Err(e) => {
                    tracing::warn!(
                        path = %self.state_path.display(),
                        error = %e,
                        "ignoring unreadable decay marker"
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecallError::io(&self.state_path, e)),
        }
    }

    /// When the next scan is allowed; `None` if it is allowed right away.
    pub fn next_due(&self) -> RecallResult<Option<OffsetDateTime>> {
        Ok(self
            .last_run()?
            .map(|t| recall_core::ts::saturating_add(t, self.policy.min_interval)))
    }

    /// Run a scan if the minimum interval has passed since the last one.
    ///
    /// A clock that went backwards (last run in the future) also skips.
    pub fn run_if_due(&self, now: OffsetDateTime) -> RecallResult<DecayOutcome> {
        let _guard = recall_store::lock_file(&self.lock_path).map_err(|e| RecallError::Lock {
            path: self.lock_path.clone(),
            reason: format!("{e:#}"),
        })?;

        if let Some(last_run) = self.last_run()? {
            let next_due = recall_core::ts::saturating_add(last_run, self.policy.min_interval);
            if now < next_due {
                tracing::debug!(%next_due, "decay not due");
                return Ok(DecayOutcome::Skipped { last_run, next_due });
            }
        }
        self.scan_and_mark(now).map(DecayOutcome::Ran)
    }

    /// Run a scan regardless of the interval. Still records the run.
    pub fn run_now(&self, now: OffsetDateTime) -> RecallResult<DecayReport> {
        let _guard = recall_store::lock_file(&self.lock_path).map_err(|e| RecallError::Lock {
            path: self.lock_path.clone(),
            reason: format!("{e:#}"),
        })?;
        self.scan_and_mark(now)
    }

    fn scan_and_mark(&self, now: OffsetDateTime) -> RecallResult<DecayReport> {
        let report = self.scan(now)?;
        let stamp = recall_core::ts::format_rfc3339(now);
        recall_store::write_atomic(&self.state_path, stamp.as_bytes())
            .map_err(|e| RecallError::persist("decay state", e))?;
        tracing::info!(
            scanned = report.scanned,
            decayed = report.decayed,
            promoted = report.promoted,
            reactivated = report.reactivated,
            "decay scan complete"
        );
        Ok(report)
    }

    /// Re-tier every lesson in both stores, one exclusive store update at a
    /// time. Stores without changes are not rewritten.
    fn scan(&self, now: OffsetDateTime) -> RecallResult<DecayReport> {
        let mut report = DecayReport::new(now);
        for store in self.stores.all() {
            let _guard = store.lock()?;
            let mut lessons = store.load()?;
            let mut changed = Vec::new();
            for lesson in lessons.iter_mut() {
                report.scanned += 1;
                let next = evaluate(lesson, now, &self.policy);
                if next != lesson.tier {
                    changed.push(TierChange {
                        lesson_id: lesson.id.clone(),
                        scope: store.scope(),
                        from: lesson.tier,
                        to: next,
                    });
                    lesson.tier = next;
                }
            }
            if !changed.is_empty() {
                store.save(&lessons)?;
                for change in changed {
                    tracing::debug!(
                        lesson = %change.lesson_id,
                        from = change.from.as_str(),
                        to = change.to.as_str(),
                        "tier changed"
                    );
                    report.record(change);
                }
            }
        }
        Ok(report)
    }
}
