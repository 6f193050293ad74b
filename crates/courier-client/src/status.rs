use serde::{Deserialize, Serialize};

/// Delivery state of an outgoing message as rendered by the sender.
///
/// Progress is monotone: `Sending → Sent → Delivered → Seen`, where
/// `Delivered` may be skipped. `Error` is reachable only from `Sending` and
/// is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Seen,
    Error,
}

impl DeliveryStatus {
    fn rank(self) -> Option<u8> {
        match self {
            DeliveryStatus::Sending => Some(0),
            DeliveryStatus::Sent => Some(1),
            DeliveryStatus::Delivered => Some(2),
            DeliveryStatus::Seen => Some(3),
            DeliveryStatus::Error => None,
        }
    }

    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(0), None) => true,
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }

    /// Move to `next` if that is forward progress. Returns whether the
    /// status changed.
    pub fn advance(&mut self, next: DeliveryStatus) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_pending(self) -> bool {
        self == DeliveryStatus::Sending
    }
}
