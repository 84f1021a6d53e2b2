//! Last-in-first-out delivery queue.

use std::sync::Mutex;

use crate::event::Event;

use super::QueueStrategy;

/// LIFO queue backed by a mutex-guarded `Vec`.
///
/// Newest events are delivered first, which suits consumers that care
/// about the latest state more than history. A re-enqueued event lands on
/// top, so under LIFO a failed publish is retried before older backlog.
pub struct LifoQueue {
    items: Mutex<Vec<Event>>,
}

impl LifoQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStrategy for LifoQueue {
    fn enqueue(&self, event: Event) {
        self.lock_items().push(event);
    }

    fn try_dequeue(&self) -> Option<Event> {
        self.lock_items().pop()
    }

    fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    fn message_count(&self) -> usize {
        self.lock_items().len()
    }
}
