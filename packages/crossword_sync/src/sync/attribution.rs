use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::models::ClueKey;

use super::broadcaster::Broadcaster;
use super::protocol::SyncEvent;
use super::store::{ClaimResult, SessionStore};

/// First-claim-wins credit for clues.
///
/// Claims are compare-and-set in the store. Only a successful claim is
/// broadcast.
pub struct AttributionRegistry {
    store: Arc<dyn SessionStore>,
    broadcaster: Arc<Broadcaster>,
}

impl AttributionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    pub async fn claim(
        &self,
        session_id: &str,
        key: ClueKey,
        user_id: Option<i64>,
        username: &str,
    ) -> Result<ClaimResult> {
        let result = self
            .store
            .record_attribution(session_id, key, user_id, username)
            .await?;

        match &result {
            ClaimResult::Claimed(attribution) => {
                self.broadcaster.broadcast(
                    session_id,
                    &SyncEvent::WordClaimed {
                        clue_key: key,
                        user_id: attribution.user_id,
                        username: attribution.username.clone(),
                        timestamp: attribution.timestamp.clone(),
                    },
                    None,
                );
            }
            ClaimResult::AlreadyClaimed => {
                debug!(session_id, clue_key = %key, username, "claim lost to earlier claimant");
            }
            ClaimResult::UnknownSession => {}
        }
        Ok(result)
    }
}
