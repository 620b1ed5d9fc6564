//! Usage bookkeeping for lessons: who cited what, and how lessons move between
//! tiers over time.

pub mod citation;
pub mod decay;
pub mod manager;
pub mod store;

pub use citation::{CitationOutcome, CitationTracker, CreditEntry, SessionCitationState};
pub use decay::{evaluate, DecayEngine, DecayOutcome, DecayPolicy, DecayReport, TierChange};
pub use manager::LessonsManager;
pub use store::{JsonLessonStore, LessonStore, LessonStores};
