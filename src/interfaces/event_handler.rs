// ============================================================================
// Event Handler Interface
// Outbound events for notification dispatch, persistence and analytics
// ============================================================================

use crate::domain::{
    OrderBookSnapshot, OrderId, OrderStatus, PriceBar, ProductId, StatusChange, TransactionId,
};
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Events emitted by the engine after a successful commit
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EngineEvent {
    /// Order accepted into the store with its initial status
    OrderSubmitted {
        order_id: OrderId,
        product_id: ProductId,
        status: OrderStatus,
        timestamp: DateTime<Utc>,
    },

    OrderStatusChanged {
        order_id: OrderId,
        old_status: OrderStatus,
        new_status: OrderStatus,
        timestamp: DateTime<Utc>,
    },

    /// One per transaction, so two per match
    TradeExecuted {
        transaction_id: TransactionId,
        order_id: OrderId,
        counter_order_id: Option<OrderId>,
        price: Price,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    OrderBookUpdated {
        product_id: ProductId,
        snapshot: Arc<OrderBookSnapshot>,
    },

    PriceBarUpdated {
        bar: PriceBar,
    },
}

impl EngineEvent {
    pub(crate) fn status_changed(change: &StatusChange, timestamp: DateTime<Utc>) -> Self {
        EngineEvent::OrderStatusChanged {
            order_id: change.order_id,
            old_status: change.old_status,
            new_status: change.new_status,
            timestamp,
        }
    }
}

/// Event handler trait for processing engine events
/// Implementations can handle logging, metrics, notifications, etc.
pub trait EventHandler: Send + Sync {
    /// Handle an engine event
    fn on_event(&self, event: EngineEvent);

    /// Batch event handler (optional optimization)
    fn on_events(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.on_event(event);
        }
    }
}

/// No-op event handler for testing
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn on_event(&self, _event: EngineEvent) {}
}

/// Logging event handler
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: EngineEvent) {
        tracing::debug!(?event, "matching engine event");
    }
}

/// Forwards events over a crossbeam channel to a consumer thread.
pub struct ChannelEventHandler {
    sender: Sender<EngineEvent>,
}

impl ChannelEventHandler {
    pub fn new(sender: Sender<EngineEvent>) -> Self {
        Self { sender }
    }

    /// Handler plus the receiving end of an unbounded channel.
    pub fn unbounded() -> (Self, Receiver<EngineEvent>) {
        let (sender, receiver) = channel::unbounded();
        (Self::new(sender), receiver)
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_event(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!("event receiver dropped; discarding engine event");
        }
    }
}
