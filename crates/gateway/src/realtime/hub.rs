//! The fan-out hub.
//!
//! Subscriptions are indexed `stream → user → connections`. Every connection
//! owns a bounded send queue; enqueue never blocks. A connection whose queue
//! is full is evicted — one slow subscriber must not stall the others.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::frame::{normalize_stream, ServerFrame};

/// Per-connection send-queue capacity.
pub const SEND_QUEUE_CAPACITY: usize = 64;

/// Seam for components that publish events without holding a hub reference
/// in tests.
pub trait EventSink: Send + Sync {
    fn emit(&self, stream: &str, frame: ServerFrame);
}

impl EventSink for Hub {
    fn emit(&self, stream: &str, frame: ServerFrame) {
        self.broadcast_stream(stream, frame);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

struct Connection {
    user_id: String,
    /// Streams this connection is currently subscribed to.
    streams: HashSet<String>,
    /// Streams this connection may subscribe to. `None` = unrestricted.
    allowed: Option<HashSet<String>>,
    sender: mpsc::Sender<ServerFrame>,
}

impl Connection {
    fn may_subscribe(&self, stream: &str) -> bool {
        self.allowed.as_ref().is_none_or(|a| a.contains(stream))
    }
}

#[derive(Default)]
struct HubInner {
    /// stream → user → connection set.
    subscriptions: HashMap<String, HashMap<String, HashSet<ConnId>>>,
    connections: HashMap<ConnId, Connection>,
    next_id: u64,
}

impl HubInner {
    fn index_insert(&mut self, stream: &str, user_id: &str, id: ConnId) {
        self.subscriptions
            .entry(stream.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_default()
            .insert(id);
    }

    fn index_remove(&mut self, stream: &str, user_id: &str, id: ConnId) {
        if let Some(users) = self.subscriptions.get_mut(stream) {
            if let Some(conns) = users.get_mut(user_id) {
                conns.remove(&id);
                if conns.is_empty() {
                    users.remove(user_id);
                }
            }
            if users.is_empty() {
                self.subscriptions.remove(stream);
            }
        }
    }

    /// Remove a connection and all of its subscriptions. Returns its sender
    /// so the channel closes when the caller drops it.
    fn detach(&mut self, id: ConnId) -> Option<mpsc::Sender<ServerFrame>> {
        let conn = self.connections.remove(&id)?;
        for stream in &conn.streams {
            if let Some(users) = self.subscriptions.get_mut(stream) {
                if let Some(conns) = users.get_mut(&conn.user_id) {
                    conns.remove(&id);
                    if conns.is_empty() {
                        users.remove(&conn.user_id);
                    }
                }
                if users.is_empty() {
                    self.subscriptions.remove(stream);
                }
            }
        }
        Some(conn.sender)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
    /// Write failures since start (slow-consumer evictions and socket
    /// write errors), read by the realtime probe.
    failures: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and subscribe it to `initial` (minus anything
    /// outside `allowed`). Returns the handle and the receive side of its
    /// send queue for the socket's write loop.
    pub fn register(
        &self,
        user_id: &str,
        allowed: Option<HashSet<String>>,
        initial: &[String],
    ) -> (ConnId, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let allowed = allowed
            .map(|set| set.iter().map(|s| normalize_stream(s)).collect::<HashSet<_>>());

        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ConnId(inner.next_id);
        inner.connections.insert(
            id,
            Connection {
                user_id: user_id.to_string(),
                streams: HashSet::new(),
                allowed,
                sender: tx,
            },
        );
        drop(inner);

        self.subscribe(id, initial);
        tracing::debug!(user_id = %user_id, conn = id.0, "realtime connection registered");
        (id, rx)
    }

    /// Subscribe to streams. Streams outside the connection's allowed set
    /// are skipped with a log line; the rest proceed.
    pub fn subscribe(&self, id: ConnId, streams: &[String]) {
        let mut inner = self.inner.lock();
        for raw in streams {
            let stream = normalize_stream(raw);
            if stream.is_empty() {
                continue;
            }
            let Some(conn) = inner.connections.get_mut(&id) else {
                return;
            };
            if !conn.may_subscribe(&stream) {
                tracing::debug!(conn = id.0, stream = %stream, "subscribe to disallowed stream skipped");
                continue;
            }
            if conn.streams.insert(stream.clone()) {
                let user_id = conn.user_id.clone();
                inner.index_insert(&stream, &user_id, id);
            }
        }
    }

    pub fn unsubscribe(&self, id: ConnId, streams: &[String]) {
        let mut inner = self.inner.lock();
        for raw in streams {
            let stream = normalize_stream(raw);
            let Some(conn) = inner.connections.get_mut(&id) else {
                return;
            };
            if conn.streams.remove(&stream) {
                let user_id = conn.user_id.clone();
                inner.index_remove(&stream, &user_id, id);
            }
        }
    }

    /// Drop a connection and every subscription it held. Idempotent.
    pub fn remove(&self, id: ConnId) {
        let sender = self.inner.lock().detach(id);
        if sender.is_some() {
            tracing::debug!(conn = id.0, "realtime connection removed");
        }
    }

    // ── Broadcast ────────────────────────────────────────────────────

    /// Push a frame to every subscriber of `stream`.
    pub fn broadcast_stream(&self, stream: &str, frame: ServerFrame) {
        self.broadcast_filtered(stream, frame, |_| true);
    }

    /// Push a frame to one user's subscribed connections.
    pub fn broadcast_to_user(&self, stream: &str, user_id: &str, frame: ServerFrame) {
        self.broadcast_filtered(stream, frame, |u| u == user_id);
    }

    /// Push a frame to a set of users.
    pub fn broadcast_to_users(&self, stream: &str, user_ids: &[String], frame: ServerFrame) {
        self.broadcast_filtered(stream, frame, |u| user_ids.iter().any(|x| x == u));
    }

    /// Reply on a single connection (used for pong).
    pub fn send_to_conn(&self, id: ConnId, frame: ServerFrame) {
        let mut inner = self.inner.lock();
        let Some(conn) = inner.connections.get(&id) else {
            return;
        };
        if conn.sender.try_send(frame).is_err() {
            drop(inner.detach(id));
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn broadcast_filtered(
        &self,
        stream: &str,
        frame: ServerFrame,
        user_matches: impl Fn(&str) -> bool,
    ) {
        let stream = normalize_stream(stream);
        let mut inner = self.inner.lock();

        let targets: Vec<ConnId> = match inner.subscriptions.get(&stream) {
            Some(users) => users
                .iter()
                .filter(|(user, _)| user_matches(user))
                .flat_map(|(_, conns)| conns.iter().copied())
                .collect(),
            None => return,
        };

        let mut evicted = Vec::new();
        for id in targets {
            let Some(conn) = inner.connections.get(&id) else {
                continue;
            };
            // Non-blocking enqueue: a full or closed queue evicts the
            // connection rather than stalling the broadcast.
            if conn.sender.try_send(frame.clone()).is_err() {
                evicted.push(id);
            }
        }
        for id in evicted {
            if inner.detach(id).is_some() {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(conn = id.0, stream = %stream, "slow realtime consumer evicted");
            }
        }
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Called by the socket write loop when a write fails.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Subscriber count for a stream, across all users.
    pub fn subscriber_count(&self, stream: &str) -> usize {
        let stream = normalize_stream(stream);
        self.inner
            .lock()
            .subscriptions
            .get(&stream)
            .map(|users| users.values().map(HashSet::len).sum())
            .unwrap_or(0)
    }
}
