//! Delivery queue strategies.
//!
//! Events wait here between `send_message` and broker delivery. The
//! pipeline dequeues one event at a time; failed publishes come back via
//! `enqueue`, so a strategy also decides where retried events land
//! relative to new ones.

use std::sync::Arc;

use crate::event::Event;

mod factory;
mod fifo;
mod lifo;

pub use factory::create_queue;
pub use fifo::FifoQueue;
pub use lifo::LifoQueue;

/// Ordering strategy for the delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// First in, first out. Preserves submission order.
    Fifo,
    /// Last in, first out. Newest events are delivered first.
    Lifo,
}

impl QueueKind {
    /// Parse a strategy name from configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fifo" => Some(Self::Fifo),
            "lifo" => Some(Self::Lifo),
            _ => None,
        }
    }
}

/// A thread-safe holding queue decoupling event producers from the
/// delivery pipeline.
///
/// Implementations are unbounded; backpressure comes from the pipeline
/// pausing dequeues while the sink is disconnected, not from queue
/// limits. `message_count` and `is_empty` are point-in-time snapshots
/// and may be stale by the time the caller acts on them.
pub trait QueueStrategy: Send + Sync {
    /// Add an event at the strategy's insertion point.
    fn enqueue(&self, event: Event);

    /// Remove and return the next event, or `None` when empty.
    fn try_dequeue(&self) -> Option<Event>;

    /// Whether the queue is currently empty.
    fn is_empty(&self) -> bool;

    /// Number of events currently queued.
    fn message_count(&self) -> usize;
}

/// Build a queue directly from a strategy kind.
pub fn queue_for_kind(kind: QueueKind) -> Arc<dyn QueueStrategy> {
    match kind {
        QueueKind::Fifo => Arc::new(FifoQueue::new()),
        QueueKind::Lifo => Arc::new(LifoQueue::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_strategies() {
        assert_eq!(QueueKind::parse("fifo"), Some(QueueKind::Fifo));
        assert_eq!(QueueKind::parse("LIFO"), Some(QueueKind::Lifo));
        assert_eq!(QueueKind::parse("priority"), None);
    }

    #[test]
    fn test_queue_for_kind_honors_ordering() {
        let fifo = queue_for_kind(QueueKind::Fifo);
        fifo.enqueue(Event::new("a"));
        fifo.enqueue(Event::new("b"));
        assert_eq!(fifo.try_dequeue().map(|e| e.payload().to_string()), Some("a".to_string()));

        let lifo = queue_for_kind(QueueKind::Lifo);
        lifo.enqueue(Event::new("a"));
        lifo.enqueue(Event::new("b"));
        assert_eq!(lifo.try_dequeue().map(|e| e.payload().to_string()), Some("b".to_string()));
    }
}
