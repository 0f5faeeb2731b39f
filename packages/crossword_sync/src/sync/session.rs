use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{Row, normalize_cell_value};

use super::broadcaster::Broadcaster;
use super::protocol::SyncEvent;
use super::store::{CellWrite, SessionStore};

/// Persist-then-broadcast path for fill state.
///
/// Cells are overwrite-on-arrival. Broadcasts go out in the order their
/// writes were persisted.
pub struct SessionSync {
    store: Arc<dyn SessionStore>,
    broadcaster: Arc<Broadcaster>,
    ordering: Mutex<()>,
}

impl SessionSync {
    pub fn new(store: Arc<dyn SessionStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            ordering: Mutex::new(()),
        }
    }

    /// Store one cell and fan out `cell_updated`. Only a stored write is broadcast.
    pub async fn apply_cell(
        &self,
        session_id: &str,
        row: usize,
        col: usize,
        value: &str,
        sender_id: Option<&str>,
    ) -> Result<CellWrite> {
        let value = normalize_cell_value(value);
        let _order = self.ordering.lock().await;
        let write = self.store.update_cell(session_id, row, col, value).await?;
        if write == CellWrite::Stored {
            self.broadcaster
                .broadcast_cell_update(session_id, row, col, value, sender_id);
        }
        Ok(write)
    }

    /// Replace the whole grid and fan out `puzzle_updated` (skipping the
    /// sender's stream). Returns false if the session is unknown.
    pub async fn replace_state(
        &self,
        session_id: &str,
        state: &[Row],
        sender_id: Option<&str>,
    ) -> Result<bool> {
        let _order = self.ordering.lock().await;
        if !self.store.update_whole_state(session_id, state).await? {
            return Ok(false);
        }
        // Re-read so clients get the padded form.
        if let Some(state) = self.store.get_state(session_id).await? {
            self.broadcaster.broadcast(
                session_id,
                &SyncEvent::PuzzleUpdated { state },
                sender_id,
            );
        }
        Ok(true)
    }

    /// Read the grid and hand it to `register` while no write can land, so
    /// every later write reaches whatever `register` subscribes.
    ///
    /// Returns `None`, without calling `register`, if the session is unknown.
    pub async fn subscribe_with_snapshot<T>(
        &self,
        session_id: &str,
        register: impl FnOnce(Vec<Row>) -> T,
    ) -> Result<Option<T>> {
        let _order = self.ordering.lock().await;
        Ok(self.store.get_state(session_id).await?.map(register))
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<Option<Vec<Row>>> {
        self.store.get_state(session_id).await
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}
