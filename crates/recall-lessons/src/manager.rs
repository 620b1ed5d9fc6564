use recall_core::{EventKind, EventRecord, RecallResult};
use recall_store::{RecallConfig, RecallPaths};
use time::OffsetDateTime;

use crate::citation::{CitationOutcome, CitationTracker};
use crate::decay::{DecayEngine, DecayOutcome, DecayPolicy, DecayReport};
use crate::store::LessonStores;

/// Entry point used by agent-session processes.
///
/// Holds the citation tracker and the decay engine side by side and reports
/// what they did to the event log. Event log writes are best effort: a failed
/// append is logged, never turned into a failed citation.
pub struct LessonsManager {
    paths: RecallPaths,
    stores: LessonStores,
    citations: CitationTracker,
    decay: DecayEngine,
    pid: u32,
}

impl LessonsManager {
    pub fn open(paths: RecallPaths, config: &RecallConfig) -> Self {
        let stores = LessonStores::json(&paths);
        Self::with_stores(paths, stores, DecayPolicy::from_config(config))
    }

    pub fn with_stores(paths: RecallPaths, stores: LessonStores, policy: DecayPolicy) -> Self {
        let citations = CitationTracker::new(&paths.citation_state_dir, stores.clone());
        let decay = DecayEngine::new(&paths.decay_state, &paths.decay_lock, policy, stores.clone());
        Self {
            paths,
            stores,
            citations,
            decay,
            pid: std::process::id(),
        }
    }

    pub fn paths(&self) -> &RecallPaths {
        &self.paths
    }

    pub fn stores(&self) -> &LessonStores {
        &self.stores
    }

    pub fn citations(&mut self) -> &mut CitationTracker {
        &mut self.citations
    }

    pub fn decay(&self) -> &DecayEngine {
        &self.decay
    }

    /// Register a session and log `session_start` with the lesson counts it
    /// starts with.
    pub fn start_session(&mut self, session_id: &str, at: OffsetDateTime) -> RecallResult<()> {
        self.citations.session_started(session_id, at)?;
        let (system_count, project_count) = self.stores.sizes()?;
        self.emit(
            EventRecord::new(
                EventKind::SessionStart {
                    total_lessons: system_count + project_count,
                    system_count,
                    project_count,
                },
                at,
            )
            .with_session(session_id),
        );
        Ok(())
    }

    /// Credit a citation and, when it counted, log a `citation` event.
    pub fn cite(
        &mut self,
        session_id: &str,
        lesson_id: &str,
        at: OffsetDateTime,
    ) -> RecallResult<CitationOutcome> {
        let outcome = self.citations.record_citation(session_id, lesson_id, at)?;
        if outcome.newly_credited {
            self.emit(
                EventRecord::new(
                    EventKind::Citation {
                        lesson_id: outcome.lesson_id.clone(),
                        uses_before: outcome.uses_before,
                        uses_after: outcome.uses_after,
                    },
                    at,
                )
                .with_session(session_id),
            );
        }
        Ok(outcome)
    }

    pub fn end_session(&mut self, session_id: &str, at: OffsetDateTime) -> RecallResult<()> {
        self.citations.session_ended(session_id)?;
        self.emit(EventRecord::new(EventKind::SessionEnd, at).with_session(session_id));
        Ok(())
    }

    /// Run the decay scan if due; a completed scan is logged as `decay_result`.
    pub fn decay_if_due(&self, now: OffsetDateTime) -> RecallResult<DecayOutcome> {
        let outcome = self.decay.run_if_due(now)?;
        if let DecayOutcome::Ran(report) = &outcome {
            self.emit_decay(report);
        }
        Ok(outcome)
    }

    /// Scan regardless of the interval.
    pub fn decay_now(&self, now: OffsetDateTime) -> RecallResult<DecayReport> {
        let report = self.decay.run_now(now)?;
        self.emit_decay(&report);
        Ok(report)
    }

    fn emit_decay(&self, report: &DecayReport) {
        self.emit(EventRecord::new(
            EventKind::DecayResult {
                scanned: report.scanned,
                decayed: report.decayed,
                promoted: report.promoted,
                reactivated: report.reactivated,
            },
            report.ran_at,
        ));
    }

    fn emit(&self, record: EventRecord) {
        let record = record
            .with_pid(self.pid)
            .with_project(self.paths.project_name());
        if let Err(e) = recall_store::append_event(&self.paths.log_path, &record) {
            tracing::warn!(
                event = record.kind.name(),
                path = %self.paths.log_path.display(),
                error = %e,
                "could not append to event log"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{insert, testing::get};
    use recall_core::Lesson;
    use time::macros::datetime;

    fn manager(dir: &std::path::Path) -> LessonsManager {
        let paths = RecallPaths::discover(dir.join("base"), dir.join("my-project"));
        paths.ensure_layout().unwrap();
        LessonsManager::open(paths, &RecallConfig::default())
    }

    fn read_log(m: &LessonsManager) -> Vec<EventRecord> {
        std::fs::read_to_string(&m.paths().log_path)
            .unwrap_or_default()
            .lines()
            .map(|l| EventRecord::parse_line(l.as_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn session_lifecycle_writes_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = manager(tmp.path());
        let created = datetime!(2026-01-01 00:00:00 UTC);
        insert(
            m.stores().project.as_ref(),
            Lesson::new("L001", "a", "", created),
        )
        .unwrap();
        insert(
            m.stores().system.as_ref(),
            Lesson::new("S001", "b", "", created),
        )
        .unwrap();

        let t = datetime!(2026-01-06 10:00:00 UTC);
        m.start_session("test-123", t).unwrap();
        m.cite("test-123", "L001", t + time::Duration::minutes(1))
            .unwrap();
        m.cite("test-123", "L001", t + time::Duration::minutes(2))
            .unwrap();
        m.end_session("test-123", t + time::Duration::minutes(3))
            .unwrap();

        let log = read_log(&m);
        let kinds: Vec<&str> = log.iter().map(|r| r.kind.name()).collect();
        assert_eq!(kinds, ["session_start", "citation", "session_end"]);
        assert_eq!(
            log[0].kind,
            EventKind::SessionStart {
                total_lessons: 2,
                system_count: 1,
                project_count: 1
            }
        );
        assert_eq!(log[1].project.as_deref(), Some("my-project"));
        assert_eq!(get(m.stores(), "L001").uses, 1);
    }

    #[test]
    fn decay_result_is_logged_for_every_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path());
        let now = datetime!(2026-03-01 00:00:00 UTC);
        assert!(matches!(
            m.decay_if_due(now).unwrap(),
            DecayOutcome::Ran(_)
        ));
        assert!(matches!(
            m.decay_if_due(now).unwrap(),
            DecayOutcome::Skipped { .. }
        ));
        m.decay_now(now).unwrap();
        let log = read_log(&m);
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|r| r.kind.name() == "decay_result"));
    }
}
