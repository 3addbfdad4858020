//! Domain event system for observing the agent loop without coupling to it.
//!
//! The loop publishes an event as each tool is dispatched and completed, and
//! once per finished turn. Front ends subscribe to render diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool call was handed to the dispatcher
    ToolDispatched {
        /// Position of the call within its batch
        index: usize,
        call_id: String,
        name: String,
        arguments: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call produced its result
    ToolCompleted {
        index: usize,
        call_id: String,
        name: String,
        output: serde_json::Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a final answer with no tool requests
    ResponseGenerated {
        conversation_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A user turn finished, successfully or not
    TurnCompleted {
        conversation_id: String,
        iterations: u32,
        elapsed_ms: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and drop events rather than stalling the loop.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
