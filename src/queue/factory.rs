//! Queue strategy factory

use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::{RelayError, Result};

use super::{queue_for_kind, QueueKind, QueueStrategy};

/// Create a delivery queue based on configuration.
///
/// The strategy name comes from `queue.strategy`; an unknown name fails
/// fast so misconfiguration is caught at client construction rather than
/// at drain time.
pub fn create_queue(settings: &QueueConfig) -> Result<Arc<dyn QueueStrategy>> {
    let kind = QueueKind::parse(&settings.strategy).ok_or_else(|| {
        RelayError::InvalidConfig(format!("unsupported queue strategy: {}", settings.strategy))
    })?;

    tracing::info!(strategy = %settings.strategy, "Creating delivery queue");
    Ok(queue_for_kind(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn test_create_queue_fifo() {
        let settings = QueueConfig {
            strategy: "fifo".to_string(),
        };
        let queue = create_queue(&settings).unwrap();
        queue.enqueue(Event::new("a"));
        queue.enqueue(Event::new("b"));
        assert_eq!(queue.try_dequeue().unwrap().payload(), "a");
    }

    #[test]
    fn test_create_queue_lifo() {
        let settings = QueueConfig {
            strategy: "lifo".to_string(),
        };
        let queue = create_queue(&settings).unwrap();
        queue.enqueue(Event::new("a"));
        queue.enqueue(Event::new("b"));
        assert_eq!(queue.try_dequeue().unwrap().payload(), "b");
    }

    #[test]
    fn test_create_queue_rejects_unknown_strategy() {
        let settings = QueueConfig {
            strategy: "priority".to_string(),
        };
        let result = create_queue(&settings);
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
    }
}
