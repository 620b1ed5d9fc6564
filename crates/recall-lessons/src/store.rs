use std::path::{Path, PathBuf};
use std::sync::Arc;

use recall_core::{Lesson, RecallError, RecallResult, Scope, TierCounts};
use recall_store::paths::lock_path_for;
use recall_store::{LockGuard, RecallPaths};
use serde::{Deserialize, Serialize};

/// Interface to a durable lesson document.
///
/// Text serialization belongs to the store; the engines only touch usage
/// attributes (`uses`, `last_cited`, `tier`). Every read-modify-write must be
/// done while holding [`LessonStore::lock`], which is exclusive per store.
pub trait LessonStore: Send + Sync {
    fn scope(&self) -> Scope;
    fn path(&self) -> &Path;
    fn lock(&self) -> RecallResult<LockGuard>;
    fn load(&self) -> RecallResult<Vec<Lesson>>;
    fn save(&self, lessons: &[Lesson]) -> RecallResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LessonDocument {
    #[serde(default)]
    lessons: Vec<Lesson>,
}

/// Lesson store backed by one JSON document, written atomically.
#[derive(Debug, Clone)]
pub struct JsonLessonStore {
    scope: Scope,
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonLessonStore {
    pub fn new(scope: Scope, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            scope,
            path,
            lock_path,
        }
    }
}

impl LessonStore for JsonLessonStore {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> RecallResult<LockGuard> {
        recall_store::lock_file(&self.lock_path).map_err(|e| RecallError::Lock {
            path: self.lock_path.clone(),
            reason: format!("{e:#}"),
        })
    }

    fn load(&self) -> RecallResult<Vec<Lesson>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RecallError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let doc: LessonDocument = serde_json::from_str(&content)?;
        Ok(doc.lessons)
    }

    fn save(&self, lessons: &[Lesson]) -> RecallResult<()> {
        let doc = LessonDocument {
            lessons: lessons.to_vec(),
        };
        recall_store::write_json_atomic(&self.path, &doc)
            .map_err(|e| RecallError::persist(format!("{} lessons", self.scope.as_str()), e))
    }
}

/// Add a lesson under the store lock. Fails if the id already exists.
pub fn insert(store: &dyn LessonStore, lesson: Lesson) -> RecallResult<()> {
    let _guard = store.lock()?;
    let mut lessons = store.load()?;
    if lessons.iter().any(|l| l.id == lesson.id) {
        return Err(RecallError::Persist {
            what: format!("lesson {}", lesson.id),
            reason: "duplicate id".into(),
        });
    }
    lessons.push(lesson);
    store.save(&lessons)
}

/// The system-wide and project-local stores, shared by the engines.
#[derive(Clone)]
pub struct LessonStores {
    pub system: Arc<dyn LessonStore>,
    pub project: Arc<dyn LessonStore>,
}

impl LessonStores {
    pub fn new(system: Arc<dyn LessonStore>, project: Arc<dyn LessonStore>) -> Self {
        Self { system, project }
    }

    /// JSON stores at the well-known paths.
    pub fn json(paths: &RecallPaths) -> Self {
        Self::new(
            Arc::new(JsonLessonStore::new(Scope::System, &paths.system_lessons)),
            Arc::new(JsonLessonStore::new(Scope::Project, &paths.project_lessons)),
        )
    }

    /// Lookup order for an id: project lessons shadow system ones.
    pub fn search_order(&self) -> [&Arc<dyn LessonStore>; 2] {
        [&self.project, &self.system]
    }

    pub fn all(&self) -> [&Arc<dyn LessonStore>; 2] {
        [&self.system, &self.project]
    }

    /// Find a lesson without locking. Writes are atomic renames, so a plain
    /// read always sees a complete document.
    pub fn find(&self, lesson_id: &str) -> RecallResult<Option<(Scope, Lesson)>> {
        for store in self.search_order() {
            if let Some(lesson) = store.load()?.into_iter().find(|l| l.id == lesson_id) {
                return Ok(Some((store.scope(), lesson)));
            }
        }
        Ok(None)
    }

    /// Tier totals over both stores.
    pub fn census(&self) -> RecallResult<TierCounts> {
        let mut counts = TierCounts::default();
        for store in self.all() {
            counts.merge(TierCounts::tally(&store.load()?));
        }
        Ok(counts)
    }

    /// Lesson counts per store: `(system, project)`.
    pub fn sizes(&self) -> RecallResult<(u64, u64)> {
        Ok((
            self.system.load()?.len() as u64,
            self.project.load()?.len() as u64,
        ))
    }
}

impl std::fmt::Debug for LessonStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonStores")
            .field("system", &self.system.path())
            .field("project", &self.project.path())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use recall_core::Tier;
    use time::macros::datetime;

    #[test]
    fn missing_document_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonLessonStore::new(Scope::Project, tmp.path().join("nope.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn insert_rejects_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let stores = stores_in(tmp.path());
        let created = datetime!(2026-01-01 00:00:00 UTC);
        add(&stores.project, "L001", created);
        let dup = Lesson::new("L001", "again", "", created);
        assert!(insert(stores.project.as_ref(), dup).is_err());
        assert_eq!(stores.project.load().unwrap().len(), 1);
    }

    #[test]
    fn find_prefers_project_store() {
        let tmp = tempfile::tempdir().unwrap();
        let stores = stores_in(tmp.path());
        let created = datetime!(2026-01-01 00:00:00 UTC);
        add(&stores.system, "S001", created);
        add(&stores.system, "X001", created);
        add(&stores.project, "X001", created);

        assert_eq!(stores.find("S001").unwrap().unwrap().0, Scope::System);
        assert_eq!(stores.find("X001").unwrap().unwrap().0, Scope::Project);
        assert!(stores.find("missing").unwrap().is_none());
    }

    #[test]
    fn census_counts_both_stores() {
        let tmp = tempfile::tempdir().unwrap();
        let stores = stores_in(tmp.path());
        let created = datetime!(2026-01-01 00:00:00 UTC);
        add(&stores.system, "S001", created);
        add(&stores.project, "L001", created);
        add(&stores.project, "L002", created);

        let mut lessons = stores.project.load().unwrap();
        lessons[1].tier = Tier::Decayed;
        stores.project.save(&lessons).unwrap();

        let counts = stores.census().unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.active, 2);
        assert_eq!(counts.decayed, 1);
        assert_eq!(stores.sizes().unwrap(), (1, 2));
    }

    #[test]
    fn corrupt_document_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("lessons.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonLessonStore::new(Scope::System, &path);
        assert!(matches!(
            store.load(),
            Err(RecallError::Serialization(_))
        ));
    }
}
