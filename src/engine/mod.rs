// ============================================================================
// Engine Module
// Matching, lifecycle, book and price-history components behind the facade
// ============================================================================

mod book_aggregator;
mod concurrency;
mod lifecycle;
mod matching_engine;
mod price_time;
mod price_tracker;

pub mod factory;

pub use book_aggregator::{CacheKey, OrderBookAggregator};
pub use concurrency::{retry_on_conflict, ProductLocks};
pub use factory::{create_from_config, MatchingEngineBuilder};
pub use lifecycle::{LifecycleController, SweepOutcome, TransitionOutcome};
pub use matching_engine::{ExecutionReport, LifecycleReport, MatchingEngine};
pub use price_time::PriceTimePriority;
pub use price_tracker::PriceHistoryTracker;
