//! # parley-server
//!
//! Real-time delivery core for direct messages.
//!
//! - [`registry`]: at most one live connection bound per user
//! - [`lifecycle`]: per-socket state machine, heartbeat and teardown
//! - [`router`]: best-effort push of events to whoever is online
//! - [`api`]: login, contacts, history and send over JSON HTTP
//! - [`server`]: routes everything on one Axum listener

#![deny(unsafe_code)]

pub mod api;
pub mod connection;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;

pub use connection::ClientConnection;
pub use error::{ApiError, ServerError};
pub use lifecycle::{CloseReason, ConnectionState, LifecycleContext, Session, Step};
pub use registry::{Binding, ConnectionRegistry};
pub use router::{DeliveryOutcome, DeliveryRouter};
pub use server::{AppState, ParleyServer};
pub use shutdown::ShutdownCoordinator;
