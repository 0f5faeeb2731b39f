use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Attribution, ClueKey, Row};

/// Outcome of a compare-and-set claim on a clue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// The key was free; this attribution is now recorded.
    Claimed(Attribution),
    /// Someone got there first; the stored attribution is untouched.
    AlreadyClaimed,
    UnknownSession,
}

/// Outcome of a single-cell upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellWrite {
    Stored,
    /// More than one row or column past the stored state. Nothing was written.
    OutOfRange,
    UnknownSession,
}

/// Durable per-session fill state and attributions.
///
/// Sync code only talks to storage through this trait and broadcasts after a
/// call returns successfully.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current rows, padded to the grid's geometry. `None` if the session is unknown.
    async fn get_state(&self, session_id: &str) -> Result<Option<Vec<Row>>>;

    /// Upsert a single cell. One row or column beyond the stored state is
    /// created on demand.
    async fn update_cell(
        &self,
        session_id: &str,
        row: usize,
        col: usize,
        value: char,
    ) -> Result<CellWrite>;

    /// Replace the whole state. Returns false if the session is unknown.
    async fn update_whole_state(&self, session_id: &str, state: &[Row]) -> Result<bool>;

    async fn record_attribution(
        &self,
        session_id: &str,
        key: ClueKey,
        user_id: Option<i64>,
        username: &str,
    ) -> Result<ClaimResult>;

    /// `None` if the session is unknown.
    async fn get_attributions(
        &self,
        session_id: &str,
    ) -> Result<Option<BTreeMap<String, Attribution>>>;
}
