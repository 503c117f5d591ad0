//! Shared vocabulary for the parley workspace: identities, persisted message
//! records and the wire envelopes exchanged over a live connection.

pub mod events;
pub mod ids;
pub mod messages;

pub use events::{ClientMessage, OutboundEvent};
pub use ids::{ConnectionId, MessageId, UserId};
pub use messages::PersistedMessage;
