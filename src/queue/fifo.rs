//! First-in-first-out delivery queue.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::event::Event;

use super::QueueStrategy;

/// FIFO queue backed by a mutex-guarded `VecDeque`.
///
/// The lock is held only for O(1) push/pop operations, so a producer and
/// the draining task never contend for long. Re-enqueued events go to the
/// back, behind anything submitted while the publish was failing.
pub struct FifoQueue {
    items: Mutex<VecDeque<Event>>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStrategy for FifoQueue {
    fn enqueue(&self, event: Event) {
        self.lock_items().push_back(event);
    }

    fn try_dequeue(&self) -> Option<Event> {
        self.lock_items().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    fn message_count(&self) -> usize {
        self.lock_items().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_preserves_submission_order() {
        let queue = FifoQueue::new();
        queue.enqueue(Event::new("first"));
        queue.enqueue(Event::new("second"));
        queue.enqueue(Event::new("third"));

        assert_eq!(queue.try_dequeue().unwrap().payload(), "first");
        assert_eq!(queue.try_dequeue().unwrap().payload(), "second");
        assert_eq!(queue.try_dequeue().unwrap().payload(), "third");
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_count_matches_drainable_events() {
        let queue = FifoQueue::new();
        for i in 0..10 {
            queue.enqueue(Event::new(format!("event-{i}")));
        }
        assert_eq!(queue.message_count(), 10);
        assert!(!queue.is_empty());

        let mut drained = 0;
        while queue.try_dequeue().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 10);
        assert!(queue.is_empty());
        assert_eq!(queue.message_count(), 0);
    }

    #[test]
    fn test_dequeue_on_empty_returns_none() {
        let queue = FifoQueue::new();
        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        use std::sync::Arc;

        let queue = Arc::new(FifoQueue::new());
        let total = 1000;

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..total {
                    queue.enqueue(Event::new(format!("{i}")));
                }
            })
        };

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let mut seen = 0;
                while seen < total {
                    if queue.try_dequeue().is_some() {
                        seen += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
                seen
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), total);
        assert!(queue.is_empty());
    }
}
