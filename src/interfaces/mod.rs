// ============================================================================
// Interfaces Module
// Traits at the engine's seams: matching strategy, events, time, persistence
// ============================================================================

mod clock;
mod event_handler;
mod journal;
mod matching_algorithm;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event_handler::{
    ChannelEventHandler, EngineEvent, EventHandler, LoggingEventHandler, NoOpEventHandler,
};
#[cfg(feature = "serde")]
pub use journal::JsonLinesJournal;
pub use journal::{CommitBatch, InMemoryJournal, Journal, NoOpJournal};
pub use matching_algorithm::{MatchResult, MatchResults, MatchingAlgorithm};
