use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::ServerFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live client socket. The reader task is the sole mutator of the
/// session fields (`user_id`, `username`, `room_id`); everything else only
/// reads them, so they are plain atomics plus a mutex for the name.
///
/// The write queue has one consumer (the writer task, which holds the
/// receiver) and many producers (hub fan-out, dispatcher replies) going
/// through `try_send`. `close` drops the sender, which is how the writer
/// learns the connection is done.
pub struct Connection {
    id: u64,
    remote_addr: String,
    connected_at: Instant,
    user_id: AtomicI64,
    username: Mutex<String>,
    room_id: AtomicI64,
    outbox: Mutex<Option<mpsc::Sender<String>>>,
}

impl Connection {
    /// Returns the connection and the receiving half of its write queue;
    /// the caller hands the receiver to the writer task.
    pub fn new(remote_addr: &str, queue_cap: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue_cap);
        let conn = Arc::new(Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr: remote_addr.to_string(),
            connected_at: Instant::now(),
            user_id: AtomicI64::new(0),
            username: Mutex::new(String::new()),
            room_id: AtomicI64::new(0),
            outbox: Mutex::new(Some(tx)),
        });
        (conn, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// 0 until authenticated.
    pub fn user_id(&self) -> i64 {
        self.user_id.load(Ordering::Acquire)
    }

    pub fn username(&self) -> String {
        self.username.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reader task only; set once on successful auth.
    pub fn set_identity(&self, user_id: i64, username: &str) {
        *self.username.lock().unwrap_or_else(|e| e.into_inner()) = username.to_string();
        self.user_id.store(user_id, Ordering::Release);
    }

    /// 0 when not joined to any room.
    pub fn room_id(&self) -> i64 {
        self.room_id.load(Ordering::Acquire)
    }

    /// Reader task only.
    pub fn set_room_id(&self, room_id: i64) {
        self.room_id.store(room_id, Ordering::Release);
    }

    /// Non-blocking enqueue onto the write queue. Returns false when the
    /// queue is full or already closed; the caller counts that as a drop.
    pub fn try_send(&self, frame: String) -> bool {
        let outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        match outbox.as_ref() {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.try_send(frame.encode())
    }

    /// Idempotent: drops the write-queue sender so the writer task drains
    /// what is queued, emits a Close frame, and exits. Nothing can be
    /// enqueued afterwards.
    pub fn close(&self) {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let (a, _rx_a) = Connection::new("10.0.0.1", 4);
        let (b, _rx_b) = Connection::new("10.0.0.2", 4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn try_send_reports_full_queue() {
        let (conn, _rx) = Connection::new("10.0.0.1", 2);
        assert!(conn.try_send("a".to_string()));
        assert!(conn.try_send("b".to_string()));
        // queue is full and nobody is draining it
        assert!(!conn.try_send("c".to_string()));
    }

    #[tokio::test]
    async fn queued_frames_arrive_in_order() {
        let (conn, mut rx) = Connection::new("10.0.0.1", 8);
        conn.try_send("first".to_string());
        conn.try_send("second".to_string());
        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (conn, mut rx) = Connection::new("10.0.0.1", 4);
        conn.try_send("queued".to_string());

        conn.close();
        conn.close();
        assert!(conn.is_closed());

        // nothing can be enqueued after close
        assert!(!conn.try_send("late".to_string()));

        // the writer still drains what was queued, then sees the end
        assert_eq!(rx.recv().await.unwrap(), "queued");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn identity_starts_unauthenticated() {
        let (conn, _rx) = Connection::new("10.0.0.1", 4);
        assert_eq!(conn.user_id(), 0);
        assert_eq!(conn.room_id(), 0);

        conn.set_identity(42, "alice");
        assert_eq!(conn.user_id(), 42);
        assert_eq!(conn.username(), "alice");
    }
}
