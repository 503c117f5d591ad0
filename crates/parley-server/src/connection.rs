//! Live connection handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::ConnectionId;
use tokio::sync::mpsc;

/// One connected client, as seen by everything outside its own task.
///
/// The handle is shared through `Arc`; the registry compares handles by
/// pointer, so two connections for the same user are never confused even
/// though they carry the same identity.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<String>,
    /// Cleared once the lifecycle tears the connection down.
    open: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Last inbound frame of any kind (including pongs).
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            tx,
            open: AtomicBool::new(true),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Whether a push could still reach the client.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Mark the handle dead. Later sends are refused.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` if the handle is closed or the queue is full or
    /// closed, and increments the dropped message counter.
    pub fn send(&self, message: String) -> bool {
        if self.open.load(Ordering::Acquire) && self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(tx), rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send("hello".into()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send("hello".into()));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_full_channel_returns_false() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send("msg1".into()));
        assert!(!conn.send("msg2".into()));
        assert_eq!(conn.drop_count(), 1);
        assert!(conn.is_open());
    }

    #[test]
    fn closed_handle_refuses_sends() {
        let (conn, mut rx) = make_connection(8);
        conn.close();
        assert!(!conn.is_open());
        assert!(!conn.send("late".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn mark_alive_resets_idle_time() {
        let (conn, _rx) = make_connection(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.idle_for() >= Duration::from_millis(20));
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn ids_differ_per_connection() {
        let (a, _ra) = make_connection(1);
        let (b, _rb) = make_connection(1);
        assert_ne!(a.id, b.id);
    }
}
