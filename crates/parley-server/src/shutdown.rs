//! Graceful shutdown via `CancellationToken`.
//!
//! The listener and every live connection hold a child of the same token.
//! Cancelling it stops accepting new sockets, makes each connection send a
//! "going away" close frame, and lets the lifecycle unbind it as usual.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for `handles` to finish.
    /// Returns `false` if the deadline passed first.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), timeout_ms = timeout.as_millis() as u64, "draining");

        let all = futures::future::join_all(handles);
        match tokio::time::timeout(timeout, all).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?timeout, "drain deadline passed with tasks still running");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
