//! Realtime session sync
//!
//! Two connection registries (duplex sockets and push streams) behind one
//! broadcaster, plus the persist-then-broadcast paths for cells and claims.

pub mod attribution;
pub mod broadcaster;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod socket;
pub mod store;
pub mod stream;

use std::sync::Arc;

use crate::metrics::ServerMetrics;

pub use attribution::AttributionRegistry;
pub use broadcaster::Broadcaster;
pub use protocol::{ClientMessage, SyncEvent};
pub use registry::{ConnectionRegistry, SocketRegistry, StreamRegistry};
pub use session::SessionSync;
pub use store::{CellWrite, ClaimResult, SessionStore};

/// Everything sync-related, built once at startup and shared through `AppState`.
#[derive(Clone)]
pub struct SyncHub {
    pub sockets: Arc<SocketRegistry>,
    pub streams: Arc<StreamRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub sessions: Arc<SessionSync>,
    pub attributions: Arc<AttributionRegistry>,
}

impl SyncHub {
    pub fn new(store: Arc<dyn SessionStore>, metrics: Arc<ServerMetrics>) -> Self {
        let sockets: Arc<SocketRegistry> = Arc::new(ConnectionRegistry::new(metrics.clone()));
        let streams: Arc<StreamRegistry> = Arc::new(ConnectionRegistry::new(metrics.clone()));
        let broadcaster = Arc::new(Broadcaster::new(
            sockets.clone(),
            streams.clone(),
            metrics,
        ));
        Self {
            sessions: Arc::new(SessionSync::new(store.clone(), broadcaster.clone())),
            attributions: Arc::new(AttributionRegistry::new(store, broadcaster.clone())),
            sockets,
            streams,
            broadcaster,
        }
    }
}
