//! The unit of delivery.

use uuid::Uuid;

/// An event queued for delivery to the ingestion endpoint.
///
/// The payload arrives already serialized by the caller's schema layer and
/// is treated as opaque bytes end to end. The message id never goes on the
/// wire; it exists so enqueue, retry, and delivery log lines can be
/// correlated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    message_id: Uuid,
    payload: String,
}

impl Event {
    /// Wrap a payload with a fresh message id.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            payload: payload.into(),
        }
    }

    /// Wrap a payload under a caller-assigned id.
    pub fn with_id(message_id: Uuid, payload: impl Into<String>) -> Self {
        Self {
            message_id,
            payload: payload.into(),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}
