use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle tier of a lesson. Decay and promotion only ever move lessons
/// between tiers; nothing here deletes a lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Active,
    Decayed,
    Promoted,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Active => "active",
            Tier::Decayed => "decayed",
            Tier::Promoted => "promoted",
        }
    }
}

/// Which lesson store a lesson lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    System,
    Project,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::System => "system",
            Scope::Project => "project",
        }
    }
}

/// A persisted, citable knowledge unit with its usage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_cited: Option<OffsetDateTime>,
    #[serde(default)]
    pub uses: u64,
    #[serde(default)]
    pub tier: Tier,
}

impl Lesson {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        created: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            created,
            last_cited: None,
            uses: 0,
            tier: Tier::Active,
        }
    }

    /// The timestamp decay is measured from: last citation, else creation.
    pub fn reference_time(&self) -> OffsetDateTime {
        self.last_cited.unwrap_or(self.created)
    }

    /// Credit one citation at `at`. The count only ever grows, and
    /// `last_cited` never moves backwards or precedes `created`. A decayed lesson comes back to
    /// `active`; a promoted one stays promoted.
    pub fn credit(&mut self, at: OffsetDateTime) {
        self.uses = self.uses.saturating_add(1);
        let latest = self.last_cited.map_or(at, |t| t.max(at));
        self.last_cited = Some(latest.max(self.created));
        if self.tier == Tier::Decayed {
            self.tier = Tier::Active;
        }
    }
}

/// Tier totals across one or more stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub total: u64,
    pub active: u64,
    pub decayed: u64,
    pub promoted: u64,
}

impl TierCounts {
    pub fn tally<'a>(lessons: impl IntoIterator<Item = &'a Lesson>) -> Self {
        let mut counts = Self::default();
        for lesson in lessons {
            counts.add(lesson.tier);
        }
        counts
    }

    pub fn add(&mut self, tier: Tier) {
        self.total += 1;
        match tier {
            Tier::Active => self.active += 1,
            Tier::Decayed => self.decayed += 1,
            Tier::Promoted => self.promoted += 1,
        }
    }

    pub fn merge(&mut self, other: TierCounts) {
        self.total += other.total;
        self.active += other.active;
        self.decayed += other.decayed;
        self.promoted += other.promoted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn credit_increments_and_clamps_to_created() {
        let created = datetime!(2026-01-10 00:00:00 UTC);
        let mut lesson = Lesson::new("L001", "t", "c", created);
        lesson.credit(datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(lesson.uses, 1);
        assert_eq!(lesson.last_cited, Some(created));
    }

    #[test]
    fn older_credit_does_not_move_last_cited_back() {
        let created = datetime!(2026-01-01 00:00:00 UTC);
        let mut lesson = Lesson::new("L001", "t", "c", created);
        lesson.credit(datetime!(2026-03-01 00:00:00 UTC));
        lesson.credit(datetime!(2026-02-01 00:00:00 UTC));
        assert_eq!(lesson.uses, 2);
        assert_eq!(lesson.last_cited, Some(datetime!(2026-03-01 00:00:00 UTC)));
    }

    #[test]
    fn credit_reactivates_decayed_but_keeps_promoted() {
        let created = datetime!(2026-01-01 00:00:00 UTC);
        let mut decayed = Lesson::new("L001", "t", "c", created);
        decayed.tier = Tier::Decayed;
        decayed.credit(datetime!(2026-02-01 00:00:00 UTC));
        assert_eq!(decayed.tier, Tier::Active);

        let mut promoted = Lesson::new("L002", "t", "c", created);
        promoted.tier = Tier::Promoted;
        promoted.credit(datetime!(2026-02-01 00:00:00 UTC));
        assert_eq!(promoted.tier, Tier::Promoted);
    }

    #[test]
    fn lesson_json_defaults_missing_usage_fields() {
        let json = r#"{"id":"S001","title":"x","created":"2026-01-01T00:00:00Z"}"#;
        let lesson: Lesson = serde_json::from_str(json).unwrap();
        assert_eq!(lesson.uses, 0);
        assert_eq!(lesson.tier, Tier::Active);
        assert!(lesson.last_cited.is_none());
        assert_eq!(lesson.reference_time(), lesson.created);
    }

    #[test]
    fn tier_counts_tally() {
        let created = datetime!(2026-01-01 00:00:00 UTC);
        let mut a = Lesson::new("L1", "", "", created);
        let mut b = Lesson::new("L2", "", "", created);
        let c = Lesson::new("L3", "", "", created);
        a.tier = Tier::Decayed;
        b.tier = Tier::Promoted;
        let counts = TierCounts::tally([&a, &b, &c]);
        assert_eq!(
            counts,
            TierCounts {
                total: 3,
                active: 1,
                decayed: 1,
                promoted: 1
            }
        );
    }
}
