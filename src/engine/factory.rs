// ============================================================================
// Matching Engine Factory
// Creates matching engines with proper configuration
// ============================================================================

use crate::domain::{ApprovalPolicy, BarInterval, EngineConfig, SelfTradePolicy};
use crate::engine::{MatchingEngine, PriceTimePriority};
use crate::error::EngineResult;
use crate::interfaces::{
    Clock, EventHandler, Journal, MatchingAlgorithm, NoOpEventHandler, NoOpJournal, SystemClock,
};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use std::sync::Arc;

// ============================================================================
// Factory Functions
// ============================================================================

/// Creates a matching engine from configuration
///
/// Uses price/time priority with the configured self-trade policy, the
/// system clock and a no-op journal.
///
/// # Example
/// ```
/// use order_matching_engine::prelude::*;
/// use std::sync::Arc;
///
/// let config = EngineConfig::retail_exchange();
/// let engine = create_from_config(config, Arc::new(NoOpEventHandler)).unwrap();
/// assert_eq!(engine.algorithm_name(), "PriceTime-NoSelfTrade");
/// ```
pub fn create_from_config(
    config: EngineConfig,
    event_handler: Arc<dyn EventHandler>,
) -> EngineResult<MatchingEngine> {
    MatchingEngineBuilder::new()
        .with_config(config)
        .build(event_handler)
}

// ============================================================================
// Builder Pattern for Advanced Configuration
// ============================================================================

/// Builder for creating matching engines with fluent API
///
/// # Example
/// ```
/// use order_matching_engine::prelude::*;
/// use order_matching_engine::interfaces::InMemoryJournal;
/// use rust_decimal::Decimal;
/// use std::sync::Arc;
///
/// let journal = Arc::new(InMemoryJournal::new());
/// let engine = MatchingEngineBuilder::new()
///     .with_fee_rate(Decimal::new(1, 3))
///     .with_tick_size("0.01".parse().unwrap())
///     .with_journal(journal)
///     .build(Arc::new(NoOpEventHandler))
///     .unwrap();
/// assert_eq!(engine.config().fee_rate, Decimal::new(1, 3));
/// ```
pub struct MatchingEngineBuilder {
    config: EngineConfig,
    algorithm: Option<Box<dyn MatchingAlgorithm>>,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
}

impl Default for MatchingEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchingEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            algorithm: None,
            journal: Arc::new(NoOpJournal),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    // ========================================================================
    // Policy Configuration
    // ========================================================================

    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.config.approval = approval;
        self
    }

    /// Send every order straight to `active`
    pub fn without_approval(mut self) -> Self {
        self.config.approval = ApprovalPolicy::disabled();
        self
    }

    pub fn with_self_trade(mut self, policy: SelfTradePolicy) -> Self {
        self.config.self_trade = policy;
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.config.fee_rate = fee_rate;
        self
    }

    /// Set price tick size
    pub fn with_tick_size(mut self, tick_size: Price) -> Self {
        self.config.tick_size = Some(tick_size);
        self
    }

    /// Set lot size
    pub fn with_lot_size(mut self, lot_size: Quantity) -> Self {
        self.config.lot_size = Some(lot_size);
        self
    }

    pub fn with_bar_interval(mut self, interval: BarInterval) -> Self {
        self.config.bar_interval = interval;
        self
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    /// Use a custom matching algorithm instead of price/time priority
    pub fn with_algorithm(mut self, algorithm: Box<dyn MatchingAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the matching engine
    pub fn build(self, event_handler: Arc<dyn EventHandler>) -> EngineResult<MatchingEngine> {
        let algorithm = self
            .algorithm
            .unwrap_or_else(|| Box::new(PriceTimePriority::new(self.config.self_trade)));
        MatchingEngine::new(self.config, algorithm, self.journal, self.clock, event_handler)
    }

    /// Build with a no-op event handler
    pub fn build_silent(self) -> EngineResult<MatchingEngine> {
        self.build(Arc::new(NoOpEventHandler))
    }

    /// Get the configuration without building (for inspection)
    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }
}
