//! Best-effort push to whoever is online.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use parley_core::{OutboundEvent, UserId};
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// What happened to a single push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the recipient's live connection.
    Delivered,
    /// Recipient has no open bound connection. Nothing was sent.
    Offline,
    /// Recipient is bound but its queue refused the event.
    Dropped,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Offline => "offline",
            Self::Dropped => "dropped",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pushes events to a user's bound connection, if any.
///
/// Delivery never waits on the recipient and never reports failure to the
/// caller as an error: persistence is the durable path, the push is a
/// courtesy.
#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn deliver(&self, target: UserId, event: &OutboundEvent) -> DeliveryOutcome {
        let outcome = match self.registry.lookup(target) {
            None => DeliveryOutcome::Offline,
            Some(connection) if !connection.is_open() => DeliveryOutcome::Offline,
            Some(connection) => match event.to_json() {
                Ok(json) => {
                    if connection.send(json) {
                        DeliveryOutcome::Delivered
                    } else {
                        warn!(
                            user_id = %target,
                            conn_id = %connection.id,
                            dropped = connection.drop_count(),
                            "send queue full or closed, dropping event"
                        );
                        DeliveryOutcome::Dropped
                    }
                }
                Err(e) => {
                    warn!(user_id = %target, error = %e, "failed to serialize event");
                    DeliveryOutcome::Dropped
                }
            },
        };

        debug!(user_id = %target, event = event.event_type(), %outcome, "deliver");
        counter!("deliveries_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}
