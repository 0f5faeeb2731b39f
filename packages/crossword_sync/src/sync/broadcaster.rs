//! Session-scoped fan-out over both transports.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error};

use crate::metrics::ServerMetrics;

use super::protocol::SyncEvent;
use super::registry::{DeliveryReport, Transport};

/// Per-transport outcome of one broadcast. `None` means that path faulted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub socket: Option<DeliveryReport>,
    pub stream: Option<DeliveryReport>,
}

pub struct Broadcaster {
    sockets: Arc<dyn Transport>,
    streams: Arc<dyn Transport>,
    metrics: Arc<ServerMetrics>,
}

impl Broadcaster {
    pub fn new(
        sockets: Arc<dyn Transport>,
        streams: Arc<dyn Transport>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            sockets,
            streams,
            metrics,
        }
    }

    /// Deliver `event` to everyone in the session.
    ///
    /// `exclude` only applies to push streams. Socket subscribers always get
    /// the event and filter their own echo by `senderId`.
    pub fn broadcast(
        &self,
        session_id: &str,
        event: &SyncEvent,
        exclude: Option<&str>,
    ) -> FanoutReport {
        self.metrics.broadcast();
        let report = FanoutReport {
            socket: dispatch(self.sockets.as_ref(), |t| t.broadcast(session_id, event, None)),
            stream: dispatch(self.streams.as_ref(), |t| {
                t.broadcast(session_id, event, exclude)
            }),
        };
        debug!(
            session_id,
            event = event.event_type(),
            sockets = report.socket.map(|r| r.delivered).unwrap_or(0),
            streams = report.stream.map(|r| r.delivered).unwrap_or(0),
            "broadcast"
        );
        report
    }

    /// `cell_updated` with the sender id always embedded; the sender's own
    /// push stream is skipped.
    pub fn broadcast_cell_update(
        &self,
        session_id: &str,
        row: usize,
        col: usize,
        value: char,
        sender_id: Option<&str>,
    ) -> FanoutReport {
        let event = SyncEvent::CellUpdated {
            r: row,
            c: col,
            value: value.to_string(),
            sender_id: sender_id.map(str::to_string),
        };
        self.broadcast(session_id, &event, sender_id)
    }

    /// Deliver to a socket topic that is not a puzzle session (admin flows
    /// subscribe under a client-chosen id).
    pub fn publish_to_socket_topic(
        &self,
        topic: &str,
        event: &SyncEvent,
    ) -> Option<DeliveryReport> {
        self.metrics.broadcast();
        dispatch(self.sockets.as_ref(), |t| t.broadcast(topic, event, None))
    }

    /// Reply on whichever transport owns `client_id`.
    pub fn send_to_one(&self, client_id: &str, event: &SyncEvent) -> bool {
        [&self.sockets, &self.streams]
            .into_iter()
            .any(|t| dispatch(t.as_ref(), |t| t.send_to_one(client_id, event)).unwrap_or(false))
    }
}

/// Run one transport dispatch so that a fault there cannot stop the other.
fn dispatch<T>(transport: &dyn Transport, f: impl FnOnce(&dyn Transport) -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(|| f(transport))) {
        Ok(v) => Some(v),
        Err(_) => {
            error!(transport = transport.name(), "transport dispatch panicked");
            None
        }
    }
}
