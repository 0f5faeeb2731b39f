//! Connection Registry
//!
//! Live client handles grouped by session, one registry per transport. The
//! registry owns its handles outright; a handle whose write fails is removed
//! after the fan-out that noticed it, and the failure never reaches the caller.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use axum::response::sse::Event;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::metrics::ServerMetrics;

use super::protocol::SyncEvent;

/// How a transport turns an event into a wire frame.
pub trait FrameCodec: Send + Sync + 'static {
    /// Short transport name, used as the client id prefix and metrics label.
    const KIND: &'static str;

    /// What a client's queue carries.
    type Frame: Clone + Send + 'static;

    fn encode(event: &SyncEvent) -> anyhow::Result<Self::Frame>;
}

/// Duplex sockets get the whole event as one JSON text message: `{type, ...data}`.
pub struct SocketFrames;

impl FrameCodec for SocketFrames {
    const KIND: &'static str = "socket";

    type Frame = String;

    fn encode(event: &SyncEvent) -> anyhow::Result<String> {
        Ok(serde_json::to_string(event)?)
    }
}

/// Push streams get a server-sent event named after the event type, with the
/// untagged body as its JSON data.
pub struct StreamFrames;

impl StreamFrames {
    /// Keep-alive comment (`: heartbeat`); clients ignore it.
    pub fn heartbeat() -> Event {
        Event::default().comment("heartbeat")
    }
}

impl FrameCodec for StreamFrames {
    const KIND: &'static str = "stream";

    type Frame = Event;

    fn encode(event: &SyncEvent) -> anyhow::Result<Event> {
        Ok(Event::default()
            .event(event.event_type())
            .json_data(event.data()?)?)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportWriteError {
    #[error("client queue is full")]
    Backpressure,
    #[error("client has disconnected")]
    Closed,
}

/// Write side of one live connection. The matching receiver is drained by the
/// connection's own task.
#[derive(Debug, Clone)]
pub struct ClientHandle<F> {
    pub id: String,
    pub session_id: String,
    tx: mpsc::Sender<F>,
}

impl<F> ClientHandle<F> {
    /// Queue a frame without waiting. A full queue counts as a failed write.
    pub fn write(&self, frame: F) -> Result<(), TransportWriteError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportWriteError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportWriteError::Closed,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub removed: usize,
}

struct Buckets<F> {
    sessions: HashMap<String, HashMap<String, ClientHandle<F>>>,
    /// client id → session id, for O(1) removal
    index: HashMap<String, String>,
}

impl<F> Default for Buckets<F> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            index: HashMap::new(),
        }
    }
}

pub struct ConnectionRegistry<C: FrameCodec> {
    inner: RwLock<Buckets<C::Frame>>,
    metrics: Arc<ServerMetrics>,
    _codec: PhantomData<C>,
}

fn generate_client_id(kind: &str) -> String {
    format!(
        "{}-{}-{:08x}",
        kind,
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

impl<C: FrameCodec> ConnectionRegistry<C> {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            inner: RwLock::new(Buckets::default()),
            metrics,
            _codec: PhantomData,
        }
    }

    /// Register a connection under `session_id` and return its generated id.
    pub fn add(&self, session_id: &str, tx: mpsc::Sender<C::Frame>) -> String {
        let id = generate_client_id(C::KIND);
        self.insert(ClientHandle {
            id: id.clone(),
            session_id: session_id.to_string(),
            tx,
        });
        id
    }

    /// Like [`add`](Self::add), but `connection_established` is queued before
    /// the handle becomes visible, so it is always the client's first frame.
    ///
    /// Returns `None`, without registering, if the greeting cannot be queued.
    pub fn add_greeted(&self, session_id: &str, tx: mpsc::Sender<C::Frame>) -> Option<String> {
        let id = generate_client_id(C::KIND);
        let handle = ClientHandle {
            id: id.clone(),
            session_id: session_id.to_string(),
            tx,
        };
        let greeting = SyncEvent::ConnectionEstablished {
            client_id: id.clone(),
        };
        let frame = match C::encode(&greeting) {
            Ok(f) => f,
            Err(e) => {
                error!(transport = C::KIND, "Failed to encode greeting: {:#}", e);
                return None;
            }
        };
        if let Err(e) = handle.write(frame) {
            debug!(client_id = %id, transport = C::KIND, "greeting failed: {}", e);
            return None;
        }
        self.metrics.frames_sent(1);

        self.insert(handle);
        Some(id)
    }

    fn insert(&self, handle: ClientHandle<C::Frame>) {
        let id = handle.id.clone();
        let session_id = handle.session_id.clone();

        let mut inner = self.inner.write();
        inner.index.insert(id.clone(), session_id.clone());
        inner
            .sessions
            .entry(session_id.clone())
            .or_default()
            .insert(id.clone(), handle);
        drop(inner);

        self.metrics.connection_opened(C::KIND);
        debug!(
            client_id = %id,
            session_id = %session_id,
            transport = C::KIND,
            "client registered"
        );
    }

    /// Deregister a client. Empty session buckets are dropped. Removing an
    /// unknown id is a no-op and returns false.
    pub fn remove(&self, client_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(session_id) = inner.index.remove(client_id) else {
            return false;
        };
        if let Some(bucket) = inner.sessions.get_mut(&session_id) {
            bucket.remove(client_id);
            if bucket.is_empty() {
                inner.sessions.remove(&session_id);
            }
        }
        drop(inner);

        self.metrics.connection_closed(C::KIND);
        debug!(client_id, session_id = %session_id, transport = C::KIND, "client removed");
        true
    }

    /// Write `event` to every client in the session except `exclude`.
    pub fn broadcast(
        &self,
        session_id: &str,
        event: &SyncEvent,
        exclude: Option<&str>,
    ) -> DeliveryReport {
        let frame = match C::encode(event) {
            Ok(f) => f,
            Err(e) => {
                error!(transport = C::KIND, "Failed to encode {}: {:#}", event.event_type(), e);
                return DeliveryReport::default();
            }
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let inner = self.inner.read();
            if let Some(bucket) = inner.sessions.get(session_id) {
                for handle in bucket.values() {
                    if Some(handle.id.as_str()) == exclude {
                        continue;
                    }
                    match handle.write(frame.clone()) {
                        Ok(()) => delivered += 1,
                        Err(e) => {
                            debug!(
                                client_id = %handle.id,
                                transport = C::KIND,
                                "write failed: {}",
                                e
                            );
                            failed.push(handle.id.clone());
                        }
                    }
                }
            }
        }

        self.settle(delivered, failed)
    }

    /// Write `event` to a single client. Returns false if it is unknown or the write failed.
    pub fn send_to_one(&self, client_id: &str, event: &SyncEvent) -> bool {
        let frame = match C::encode(event) {
            Ok(f) => f,
            Err(e) => {
                error!(transport = C::KIND, "Failed to encode {}: {:#}", event.event_type(), e);
                return false;
            }
        };

        let result = {
            let inner = self.inner.read();
            let handle = inner
                .index
                .get(client_id)
                .and_then(|sid| inner.sessions.get(sid))
                .and_then(|bucket| bucket.get(client_id));
            match handle {
                Some(h) => h.write(frame),
                None => return false,
            }
        };

        match result {
            Ok(()) => {
                self.metrics.frames_sent(1);
                true
            }
            Err(e) => {
                debug!(client_id, transport = C::KIND, "write failed: {}", e);
                self.settle(0, vec![client_id.to_string()]);
                false
            }
        }
    }

    /// Write a raw frame to every client of every session, reaping failures.
    pub fn sweep(&self, frame: C::Frame) -> DeliveryReport {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let inner = self.inner.read();
            for handle in inner.sessions.values().flat_map(|b| b.values()) {
                match handle.write(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => failed.push(handle.id.clone()),
                }
            }
        }
        self.settle(delivered, failed)
    }

    fn settle(&self, delivered: usize, failed: Vec<String>) -> DeliveryReport {
        let removed = failed.iter().filter(|id| self.remove(id)).count();
        self.metrics.frames_sent(delivered as u64);
        if removed > 0 {
            self.metrics.write_failures(removed as u64);
        }
        DeliveryReport { delivered, removed }
    }

    pub fn session_of(&self, client_id: &str) -> Option<String> {
        self.inner.read().index.get(client_id).cloned()
    }

    pub fn client_count(&self, session_id: &str) -> usize {
        self.inner
            .read()
            .sessions
            .get(session_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The capability the broadcaster drives, one implementation per transport.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn broadcast(&self, session_id: &str, event: &SyncEvent, exclude: Option<&str>)
    -> DeliveryReport;
    fn send_to_one(&self, client_id: &str, event: &SyncEvent) -> bool;
}

impl<C: FrameCodec> Transport for ConnectionRegistry<C> {
    fn name(&self) -> &'static str {
        C::KIND
    }

    fn broadcast(
        &self,
        session_id: &str,
        event: &SyncEvent,
        exclude: Option<&str>,
    ) -> DeliveryReport {
        ConnectionRegistry::broadcast(self, session_id, event, exclude)
    }

    fn send_to_one(&self, client_id: &str, event: &SyncEvent) -> bool {
        ConnectionRegistry::send_to_one(self, client_id, event)
    }
}

pub type SocketRegistry = ConnectionRegistry<SocketFrames>;
pub type StreamRegistry = ConnectionRegistry<StreamFrames>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{sse_parts, sse_text};

    fn registry() -> StreamRegistry {
        ConnectionRegistry::new(Arc::new(ServerMetrics::new()))
    }

    fn cell(sender: &str) -> SyncEvent {
        SyncEvent::CellUpdated {
            r: 2,
            c: 3,
            value: "A".into(),
            sender_id: Some(sender.into()),
        }
    }

    #[test]
    fn stream_frame_format() {
        let frame = StreamFrames::encode(&SyncEvent::PuzzleUpdated {
            state: vec!["A ".into()],
        })
        .unwrap();
        assert_eq!(
            sse_text(frame),
            "event: puzzle_updated\ndata: {\"state\":[\"A \"]}\n\n"
        );
    }

    #[test]
    fn heartbeat_is_a_comment_frame() {
        assert_eq!(sse_text(StreamFrames::heartbeat()), ": heartbeat\n\n");
    }

    #[test]
    fn socket_frame_format() {
        let frame = SocketFrames::encode(&cell("x")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "cell_updated");
        assert_eq!(v["senderId"], "x");
    }

    #[test]
    fn ids_are_unique_and_namespaced() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(4);
        let a = reg.add("s1", tx.clone());
        let b = reg.add("s1", tx);
        assert_ne!(a, b);
        assert!(a.starts_with("stream-"));
    }

    #[test]
    fn greeted_clients_hear_connection_established_first() {
        let reg = registry();
        let (tx, mut rx) = mpsc::channel(4);
        let id = reg.add_greeted("s1", tx).unwrap();
        reg.broadcast("s1", &cell("x"), None);

        let (name, data) = sse_parts(rx.try_recv().unwrap());
        assert_eq!(name, "connection_established");
        assert_eq!(data["clientId"], id.as_str());
        assert_eq!(sse_parts(rx.try_recv().unwrap()).0, "cell_updated");
    }

    #[test]
    fn greeting_failure_leaves_nothing_registered() {
        let reg = registry();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        assert!(reg.add_greeted("s1", tx).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_is_idempotent_and_prunes_empty_buckets() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(4);
        let id = reg.add("s1", tx);
        assert_eq!(reg.session_count(), 1);

        assert!(reg.remove(&id));
        assert!(!reg.remove(&id));
        assert_eq!(reg.session_count(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn broadcast_honors_exclude_and_session_scope() {
        let reg = registry();
        let (tx_x, mut rx_x) = mpsc::channel(4);
        let (tx_y, mut rx_y) = mpsc::channel(4);
        let (tx_z, mut rx_z) = mpsc::channel(4);
        let x = reg.add("s1", tx_x);
        let _y = reg.add("s1", tx_y);
        let _z = reg.add("s2", tx_z);

        let report = reg.broadcast("s1", &cell(&x), Some(&x));
        assert_eq!(report, DeliveryReport { delivered: 1, removed: 0 });

        assert!(rx_x.try_recv().is_err());
        assert_eq!(sse_parts(rx_y.try_recv().unwrap()).0, "cell_updated");
        assert!(rx_z.try_recv().is_err());
    }

    #[test]
    fn failed_writes_are_reaped_after_the_fanout() {
        let reg = registry();
        let (tx_live, mut rx_live) = mpsc::channel(4);
        let (tx_dead, rx_dead) = mpsc::channel(4);
        reg.add("s1", tx_live);
        let dead = reg.add("s1", tx_dead);
        drop(rx_dead);

        let report = reg.broadcast("s1", &cell("x"), None);
        assert_eq!(report, DeliveryReport { delivered: 1, removed: 1 });
        assert!(reg.session_of(&dead).is_none());
        assert_eq!(reg.client_count("s1"), 1);
        assert!(rx_live.try_recv().is_ok());

        // The removed handle is never written to again.
        let report = reg.broadcast("s1", &cell("x"), None);
        assert_eq!(report, DeliveryReport { delivered: 1, removed: 0 });
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let reg = registry();
        let (tx, _rx) = mpsc::channel(1);
        let id = reg.add("s1", tx);
        assert_eq!(reg.broadcast("s1", &cell("x"), None).delivered, 1);
        assert_eq!(reg.broadcast("s1", &cell("x"), None).removed, 1);
        assert!(reg.session_of(&id).is_none());
    }

    #[test]
    fn send_to_one_targets_a_single_client() {
        let reg = registry();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = reg.add("s1", tx_a);
        reg.add("s1", tx_b);

        let ev = SyncEvent::ConnectionEstablished {
            client_id: a.clone(),
        };
        assert!(reg.send_to_one(&a, &ev));
        assert_eq!(sse_parts(rx_a.try_recv().unwrap()).1["clientId"], a.as_str());
        assert!(rx_b.try_recv().is_err());
        assert!(!reg.send_to_one("nobody", &ev));
    }

    #[test]
    fn sweep_reaches_every_session_and_reaps_dead_clients() {
        let reg = registry();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, rx2) = mpsc::channel(4);
        reg.add("s1", tx1);
        reg.add("s2", tx2);
        drop(rx2);

        let report = reg.sweep(StreamFrames::heartbeat());
        assert_eq!(report, DeliveryReport { delivered: 1, removed: 1 });
        assert_eq!(sse_text(rx1.try_recv().unwrap()), ": heartbeat\n\n");
        assert_eq!(reg.session_count(), 1);
    }

    #[test]
    fn metrics_follow_registrations() {
        let metrics = Arc::new(ServerMetrics::new());
        let reg: SocketRegistry = ConnectionRegistry::new(metrics.clone());
        let (tx, rx) = mpsc::channel(4);
        reg.add("s1", tx);
        drop(rx);
        reg.broadcast("s1", &cell("x"), None);

        let snap = metrics.snapshot();
        assert_eq!(snap.connections.sockets, 0);
        assert_eq!(snap.connections.total, 1);
        assert_eq!(snap.fanout.write_failures, 1);
    }
}
