pub mod error;
pub mod event;
pub mod lesson;
pub mod ts;

pub use error::{RecallError, RecallResult};
pub use event::{EventKind, EventRecord, Level};
pub use lesson::{Lesson, Scope, Tier, TierCounts};
