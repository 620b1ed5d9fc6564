//! Per-session citation dedup.
//!
//! Each session may credit a lesson at most once. The credited set is persisted
//! to `<citation_state_dir>/<session>.json` after every new credit, so a
//! restarted process picks up exactly where the previous one stopped.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use recall_core::{Lesson, RecallError, RecallResult, Scope};
use recall_store::paths::session_file_stem;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::LessonStores;

/// One credited lesson within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEntry {
    /// When this session's credit was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub first_cited: OffsetDateTime,
    /// Latest citation seen in this session, credited or not. Display only.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    /// Citations after the first one (not counted on the lesson).
    #[serde(default)]
    pub repeats: u64,
    /// Lesson count right after this session's credit.
    pub uses_after: u64,
}

/// Persisted citation state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCitationState {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
    #[serde(default)]
    pub credited: BTreeMap<String, CreditEntry>,
}

impl SessionCitationState {
    pub fn new(session_id: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.into(),
            started: at,
            updated: at,
            credited: BTreeMap::new(),
        }
    }

    pub fn is_credited(&self, lesson_id: &str) -> bool {
        self.credited.contains_key(lesson_id)
    }
}

/// Result of [`CitationTracker::record_citation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationOutcome {
    pub lesson_id: String,
    pub scope: Scope,
    pub uses_before: u64,
    pub uses_after: u64,
    /// False when the session had already credited this lesson.
    pub newly_credited: bool,
}

impl CitationOutcome {
    /// The lesson's citation count after this call.
    pub fn count(&self) -> u64 {
        self.uses_after
    }
}

pub struct CitationTracker {
    state_dir: PathBuf,
    stores: LessonStores,
    sessions: HashMap<String, SessionCitationState>,
}

impl CitationTracker {
    pub fn new(state_dir: impl Into<PathBuf>, stores: LessonStores) -> Self {
        Self {
            state_dir: state_dir.into(),
            stores,
            sessions: HashMap::new(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.state_dir
            .join(format!("{}.json", session_file_stem(session_id)))
    }

    /// Make sure `session_id` is in memory, reading any state file left by a
    /// previous process before anything else happens.
    fn ensure_loaded(&mut self, session_id: &str, at: OffsetDateTime) -> RecallResult<()> {
        if self.sessions.contains_key(session_id) {
            return Ok(());
        }
        let path = self.state_path(session_id);
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let state: SessionCitationState = serde_json::from_str(&content)?;
                tracing::debug!(
                    session = session_id,
                    credited = state.credited.len(),
                    "restored citation state"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                SessionCitationState::new(session_id, at)
            }
            Err(e) => return Err(RecallError::io(path, e)),
        };
        self.sessions.insert(session_id.to_string(), state);
        Ok(())
    }

    fn persist(&self, state: &SessionCitationState) -> RecallResult<()> {
        recall_store::write_json_atomic(&self.state_path(&state.session_id), state).map_err(|e| {
            RecallError::persist(format!("citation state for session {}", state.session_id), e)
        })
    }

    /// Start tracking a session, creating its state file if it has none yet.
    pub fn session_started(&mut self, session_id: &str, at: OffsetDateTime) -> RecallResult<()> {
        let exists = self.state_path(session_id).exists();
        self.ensure_loaded(session_id, at)?;
        if !exists {
            if let Some(state) = self.sessions.get(session_id) {
                self.persist(state)?;
            }
        }
        Ok(())
    }

    /// Credit `lesson_id` for `session_id`, at most once per session.
    ///
    /// On the first citation the lesson's count and `last_cited` are updated
    /// under the store lock and the credit is persisted. Later citations in the
    /// same session leave the lesson untouched and return its current count.
    ///
    /// If either write fails, the error is returned and the in-memory state is
    /// left as it was, so the call can be retried. A process killed between
    /// the lesson write and the session write leaves the credit unrecorded for
    /// the session, and a retry after restart counts it a second time.
    pub fn record_citation(
        &mut self,
        session_id: &str,
        lesson_id: &str,
        at: OffsetDateTime,
    ) -> RecallResult<CitationOutcome> {
        self.ensure_loaded(session_id, at)?;

        let existing = self
            .sessions
            .get(session_id)
            .and_then(|s| s.credited.get(lesson_id))
            .cloned();
        if let Some(entry) = existing {
            return self.repeat_citation(session_id, lesson_id, entry, at);
        }

        for store in self.stores.search_order() {
            let guard = store.lock()?;
            let mut lessons = store.load()?;
            let Some(idx) = lessons.iter().position(|l| l.id == lesson_id) else {
                drop(guard);
                continue;
            };
            let original: Lesson = lessons[idx].clone();
            let uses_before = original.uses;
            lessons[idx].credit(at);
            let uses_after = lessons[idx].uses;
            store.save(&lessons)?;

            let mut next = match self.sessions.get(session_id) {
                Some(state) => state.clone(),
                None => SessionCitationState::new(session_id, at),
            };
            next.updated = at.max(next.updated);
            next.credited.insert(
                lesson_id.to_string(),
                CreditEntry {
                    first_cited: at,
                    last_seen: at,
                    repeats: 0,
                    uses_after,
                },
            );
            if let Err(e) = self.persist(&next) {
                // Undo the counter so a retry does not count twice.
                lessons[idx] = original;
                if let Err(rollback) = store.save(&lessons) {
                    tracing::error!(
                        lesson = lesson_id,
                        session = session_id,
                        error = %rollback,
                        "could not roll back citation count"
                    );
                }
                return Err(e);
            }
            drop(guard);

            self.sessions.insert(session_id.to_string(), next);
            tracing::debug!(
                lesson = lesson_id,
                session = session_id,
                uses_before,
                uses_after,
                "citation credited"
            );
            return Ok(CitationOutcome {
                lesson_id: lesson_id.to_string(),
                scope: store.scope(),
                uses_before,
                uses_after,
                newly_credited: true,
            });
        }

        Err(RecallError::LessonNotFound {
            id: lesson_id.to_string(),
        })
    }

    fn repeat_citation(
        &mut self,
        session_id: &str,
        lesson_id: &str,
        entry: CreditEntry,
        at: OffsetDateTime,
    ) -> RecallResult<CitationOutcome> {
        let (scope, count) = match self.stores.find(lesson_id)? {
            Some((scope, lesson)) => (scope, lesson.uses),
            None => {
                return Err(RecallError::LessonNotFound {
                    id: lesson_id.to_string(),
                })
            }
        };

        if let Some(state) = self.sessions.get_mut(session_id) {
            if let Some(e) = state.credited.get_mut(lesson_id) {
                e.repeats += 1;
                e.last_seen = at.max(e.last_seen);
            }
            state.updated = at.max(state.updated);
        }
        // Repeat bookkeeping is display-only; a failed write loses nothing
        // that affects counting.
        if let Some(state) = self.sessions.get(session_id) {
            if let Err(e) = self.persist(state) {
                tracing::warn!(session = session_id, error = %e, "could not record repeat citation");
            }
        }

        tracing::trace!(
            lesson = lesson_id,
            session = session_id,
            repeats = entry.repeats + 1,
            "citation already credited"
        );
        Ok(CitationOutcome {
            lesson_id: lesson_id.to_string(),
            scope,
            uses_before: count,
            uses_after: count,
            newly_credited: false,
        })
    }

    /// Whether `session_id` has already credited `lesson_id`.
    pub fn is_credited(&mut self, session_id: &str, lesson_id: &str) -> RecallResult<bool> {
        self.ensure_loaded(session_id, recall_core::ts::now_utc())?;
        Ok(self
            .sessions
            .get(session_id)
            .is_some_and(|s| s.is_credited(lesson_id)))
    }

    /// The session's state as currently known, loading it if needed.
    pub fn session(&mut self, session_id: &str) -> RecallResult<Option<&SessionCitationState>> {
        if !self.sessions.contains_key(session_id) && !self.state_path(session_id).exists() {
            return Ok(None);
        }
        self.ensure_loaded(session_id, recall_core::ts::now_utc())?;
        Ok(self.sessions.get(session_id))
    }

    /// Release the session's credited set and delete its state file. Lesson
    /// counters already hold every credit and are not touched.
    pub fn session_ended(&mut self, session_id: &str) -> RecallResult<bool> {
        let in_memory = self.sessions.remove(session_id).is_some();
        let path = self.state_path(session_id);
        let on_disk = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(RecallError::io(path, e)),
        };
        tracing::debug!(session = session_id, "citation state released");
        Ok(in_memory || on_disk)
    }

    /// Delete state for sessions idle longer than `idle`. Returns how many
    /// sessions were dropped.
    pub fn prune_idle(&mut self, now: OffsetDateTime, idle: time::Duration) -> RecallResult<usize> {
        let entries = match std::fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(RecallError::io(&self.state_dir, e)),
        };

        let mut pruned = 0;
        for entry in entries {
            let entry = entry.map_err(|e| RecallError::io(&self.state_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let state: SessionCitationState = match std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str(&c).ok())
            {
                Some(s) => s,
                None => {
                    tracing::warn!(path = %path.display(), "skipping unreadable citation state");
                    continue;
                }
            };
            let last = self
                .sessions
                .get(&state.session_id)
                .map(|s| s.updated)
                .unwrap_or(state.updated);
            if now - last > idle {
                self.session_ended(&state.session_id)?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned idle citation state");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{add, get, stores_in};
    use recall_core::Tier;
    use time::macros::datetime;

    fn setup() -> (tempfile::TempDir, LessonStores, CitationTracker) {
        let tmp = tempfile::tempdir().unwrap();
        let stores = stores_in(tmp.path());
        let created = datetime!(2026-01-01 00:00:00 UTC);
        add(&stores.project, "L001", created);
        add(&stores.project, "L002", created);
        add(&stores.system, "S001", created);
        let tracker = CitationTracker::new(tmp.path().join("citations"), stores.clone());
        (tmp, stores, tracker)
    }

    #[test]
    fn second_citation_in_session_does_not_count() {
        let (_tmp, stores, mut tracker) = setup();
        let t1 = datetime!(2026-01-06 10:01:00 UTC);
        let t2 = datetime!(2026-01-06 10:05:00 UTC);

        let first = tracker.record_citation("test-123", "L001", t1).unwrap();
        let second = tracker.record_citation("test-123", "L001", t2).unwrap();

        assert!(first.newly_credited);
        assert!(!second.newly_credited);
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);

        let lesson = get(&stores, "L001");
        assert_eq!(lesson.uses, 1);
        assert_eq!(lesson.last_cited, Some(t1));
    }

    #[test]
    fn repeats_are_recorded_for_display() {
        let (_tmp, _stores, mut tracker) = setup();
        let t1 = datetime!(2026-01-06 10:01:00 UTC);
        let t2 = datetime!(2026-01-06 10:05:00 UTC);
        tracker.record_citation("s1", "L001", t1).unwrap();
        tracker.record_citation("s1", "L001", t2).unwrap();

        let state = tracker.session("s1").unwrap().unwrap();
        let entry = &state.credited["L001"];
        assert_eq!(entry.first_cited, t1);
        assert_eq!(entry.last_seen, t2);
        assert_eq!(entry.repeats, 1);
    }

    #[test]
    fn different_sessions_each_credit_once() {
        let (_tmp, stores, mut tracker) = setup();
        let t = datetime!(2026-01-06 10:00:00 UTC);
        tracker.record_citation("a", "L001", t).unwrap();
        tracker.record_citation("b", "L001", t).unwrap();
        tracker.record_citation("b", "L001", t).unwrap();
        let out = tracker.record_citation("c", "S001", t).unwrap();
        assert_eq!(out.scope, Scope::System);
        assert_eq!(get(&stores, "L001").uses, 2);
        assert_eq!(get(&stores, "S001").uses, 1);
    }

    #[test]
    fn dedup_survives_restart() {
        let (tmp, stores, mut tracker) = setup();
        let t = datetime!(2026-01-06 10:00:00 UTC);
        tracker.record_citation("test-123", "L001", t).unwrap();
        drop(tracker);

        let mut restarted = CitationTracker::new(tmp.path().join("citations"), stores.clone());
        assert!(restarted.is_credited("test-123", "L001").unwrap());
        let out = restarted
            .record_citation("test-123", "L001", t + time::Duration::minutes(1))
            .unwrap();
        assert!(!out.newly_credited);
        assert_eq!(get(&stores, "L001").uses, 1);
    }

    #[test]
    fn session_end_releases_state() {
        let (tmp, stores, mut tracker) = setup();
        let t = datetime!(2026-01-06 10:00:00 UTC);
        tracker.record_citation("s1", "L002", t).unwrap();
        let state_file = tmp.path().join("citations").join("s1.json");
        assert!(state_file.exists());

        assert!(tracker.session_ended("s1").unwrap());
        assert!(!state_file.exists());
        assert!(tracker.session("s1").unwrap().is_none());
        // Counters keep the credit.
        assert_eq!(get(&stores, "L002").uses, 1);
        assert!(!tracker.session_ended("s1").unwrap());
    }

    #[test]
    fn unknown_lesson_is_an_error_and_not_credited() {
        let (_tmp, _stores, mut tracker) = setup();
        let t = datetime!(2026-01-06 10:00:00 UTC);
        let err = tracker.record_citation("s1", "L999", t).unwrap_err();
        assert!(matches!(err, RecallError::LessonNotFound { .. }));
        assert!(!tracker.is_credited("s1", "L999").unwrap());
    }

    #[test]
    fn citing_decayed_lesson_reactivates_it() {
        let (_tmp, stores, mut tracker) = setup();
        let mut lessons = stores.project.load().unwrap();
        lessons[0].tier = Tier::Decayed;
        stores.project.save(&lessons).unwrap();

        tracker
            .record_citation("s1", "L001", datetime!(2026-03-01 00:00:00 UTC))
            .unwrap();
        assert_eq!(get(&stores, "L001").tier, Tier::Active);
    }

    #[cfg(unix)]
    #[test]
    fn failed_state_write_leaves_counter_and_memory_unchanged() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, stores, mut tracker) = setup();
        let dir = tmp.path().join("citations");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();
        // Root ignores directory permissions; nothing to observe then.
        if std::fs::write(dir.join("probe"), b"x").is_ok() {
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let t = datetime!(2026-01-06 10:00:00 UTC);
        assert!(tracker.record_citation("s1", "L001", t).is_err());
        assert_eq!(get(&stores, "L001").uses, 0);

        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();
        let out = tracker.record_citation("s1", "L001", t).unwrap();
        assert!(out.newly_credited);
        assert_eq!(get(&stores, "L001").uses, 1);
    }

    #[test]
    fn prune_idle_drops_old_sessions_only() {
        let (tmp, _stores, mut tracker) = setup();
        let old = datetime!(2026-01-01 00:00:00 UTC);
        let recent = datetime!(2026-01-06 09:00:00 UTC);
        tracker.record_citation("old", "L001", old).unwrap();
        tracker.record_citation("recent", "L001", recent).unwrap();

        let now = datetime!(2026-01-06 10:00:00 UTC);
        let pruned = tracker.prune_idle(now, time::Duration::hours(24)).unwrap();
        assert_eq!(pruned, 1);
        let dir = tmp.path().join("citations");
        assert!(!dir.join("old.json").exists());
        assert!(dir.join("recent.json").exists());
    }

    #[test]
    fn concurrent_trackers_and_decay_lose_no_update() {
        use crate::decay::{DecayEngine, DecayPolicy};

        let tmp = tempfile::tempdir().unwrap();
        let stores = stores_in(tmp.path());
        add(&stores.project, "L001", datetime!(2025-01-01 00:00:00 UTC));
        let now = datetime!(2026-03-01 00:00:00 UTC);

        let mut workers = Vec::new();
        for worker in 0..4 {
            let mut tracker = CitationTracker::new(tmp.path().join("citations"), stores.clone());
            workers.push(std::thread::spawn(move || {
                for n in 0..10 {
                    let session = format!("w{worker}-s{n}");
                    tracker.record_citation(&session, "L001", now).unwrap();
                    tracker.record_citation(&session, "L001", now).unwrap();
                }
            }));
        }
        let engine = DecayEngine::new(
            tmp.path().join(".decay-last-run"),
            tmp.path().join(".decay.lock"),
            DecayPolicy {
                promote_threshold: 0,
                ..DecayPolicy::default()
            },
            stores.clone(),
        );
        let decayer = std::thread::spawn(move || {
            for _ in 0..10 {
                engine.run_now(now).unwrap();
            }
        });

        for w in workers {
            w.join().unwrap();
        }
        decayer.join().unwrap();

        let lesson = get(&stores, "L001");
        assert_eq!(lesson.uses, 40);
        assert_eq!(lesson.last_cited, Some(now));
        assert_eq!(lesson.tier, Tier::Active);
    }

    #[test]
    fn later_credit_from_another_session_keeps_newest_citation() {
        let (_tmp, stores, mut tracker) = setup();
        let march = datetime!(2026-03-01 00:00:00 UTC);
        let february = datetime!(2026-02-01 00:00:00 UTC);
        tracker.record_citation("a", "L001", march).unwrap();
        let out = tracker.record_citation("b", "L001", february).unwrap();

        assert!(out.newly_credited);
        let lesson = get(&stores, "L001");
        assert_eq!(lesson.uses, 2);
        assert_eq!(lesson.last_cited, Some(march));
    }

    #[test]
    fn session_started_creates_state_file() {
        let (tmp, _stores, mut tracker) = setup();
        tracker
            .session_started("fresh", datetime!(2026-01-06 10:00:00 UTC))
            .unwrap();
        assert!(tmp.path().join("citations").join("fresh.json").exists());
    }
}
