use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row as _;
use tracing::debug;

use crate::models::{self, Attribution, ClueKey, Row, Session};
use crate::sync::store::{CellWrite, ClaimResult, SessionStore};

use super::{PuzzleRepository, now_unix};

/// Stored rows plus the geometry they should conform to.
struct StoredState {
    rows: Vec<Row>,
    width: usize,
    height: usize,
}

impl PuzzleRepository {
    /// Create a blank session for `puzzle_id`. `None` if the puzzle is unknown.
    pub async fn create_session(
        &self,
        puzzle_id: i64,
        owner_user_id: Option<i64>,
        anonymous_id: Option<String>,
    ) -> Result<Option<Session>> {
        let Some(puzzle) = self.get_puzzle(puzzle_id).await? else {
            return Ok(None);
        };

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let state = models::blank_state(puzzle.width, puzzle.height);
        let now = now_unix();

        sqlx::query(
            r#"
            INSERT INTO puzzle_sessions (session_id, puzzle_id, owner_user_id, anonymous_id, state, is_complete, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&session_id)
        .bind(puzzle_id)
        .bind(owner_user_id)
        .bind(&anonymous_id)
        .bind(serde_json::to_string(&state)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        Ok(Some(Session {
            session_id,
            puzzle_id,
            owner_user_id,
            anonymous_id,
            state,
            attributions: BTreeMap::new(),
            is_complete: false,
        }))
    }

    /// Full snapshot used when a client (re)connects.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT s.session_id, s.puzzle_id, s.owner_user_id, s.anonymous_id, s.state,
                   s.is_complete, p.width, p.height
            FROM puzzle_sessions s
            JOIN puzzles p ON p.id = s.puzzle_id
            WHERE s.session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let raw: String = r.get("state");
        let rows: Vec<Row> = serde_json::from_str(&raw).context("corrupt session state")?;
        let attributions = self.load_attributions(session_id).await?;

        Ok(Some(Session {
            session_id: r.get("session_id"),
            puzzle_id: r.get("puzzle_id"),
            owner_user_id: r.get("owner_user_id"),
            anonymous_id: r.get("anonymous_id"),
            state: models::normalize_state(
                rows,
                r.get::<i64, _>("width") as usize,
                r.get::<i64, _>("height") as usize,
            ),
            attributions,
            is_complete: r.get::<i32, _>("is_complete") != 0,
        }))
    }

    pub async fn session_puzzle_id(&self, session_id: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT puzzle_id FROM puzzle_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn set_complete(&self, session_id: &str, complete: bool) -> Result<()> {
        sqlx::query(
            "UPDATE puzzle_sessions SET is_complete = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(complete as i32)
        .bind(now_unix())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_state(&self, session_id: &str) -> Result<Option<StoredState>> {
        let row = sqlx::query(
            r#"
            SELECT s.state, p.width, p.height
            FROM puzzle_sessions s
            JOIN puzzles p ON p.id = s.puzzle_id
            WHERE s.session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let raw: String = r.get("state");
            Ok(StoredState {
                rows: serde_json::from_str(&raw).context("corrupt session state")?,
                width: r.get::<i64, _>("width") as usize,
                height: r.get::<i64, _>("height") as usize,
            })
        })
        .transpose()
    }

    async fn store_state(&self, session_id: &str, rows: &[Row]) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE puzzle_sessions SET state = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(serde_json::to_string(rows)?)
        .bind(now_unix())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("Failed to store session state")?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_attributions(&self, session_id: &str) -> Result<BTreeMap<String, Attribution>> {
        let rows = sqlx::query(
            r#"
            SELECT clue_key, user_id, username, claimed_at
            FROM clue_attributions
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get("clue_key"),
                    Attribution {
                        user_id: r.get("user_id"),
                        username: r.get("username"),
                        timestamp: r.get("claimed_at"),
                    },
                )
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for PuzzleRepository {
    async fn get_state(&self, session_id: &str) -> Result<Option<Vec<Row>>> {
        Ok(self
            .load_state(session_id)
            .await?
            .map(|s| models::normalize_state(s.rows, s.width, s.height)))
    }

    async fn update_cell(
        &self,
        session_id: &str,
        row: usize,
        col: usize,
        value: char,
    ) -> Result<CellWrite> {
        let _guard = self.state_writes.lock().await;

        let Some(stored) = self.load_state(session_id).await? else {
            return Ok(CellWrite::UnknownSession);
        };
        let mut rows = models::normalize_state(stored.rows, stored.width, stored.height);
        if !models::set_cell(&mut rows, stored.width, row, col, value) {
            debug!(session_id, row, col, "cell write outside the grid refused");
            return Ok(CellWrite::OutOfRange);
        }
        if !self.store_state(session_id, &rows).await? {
            return Ok(CellWrite::UnknownSession);
        }
        debug!(session_id, row, col, "cell stored");
        Ok(CellWrite::Stored)
    }

    async fn update_whole_state(&self, session_id: &str, state: &[Row]) -> Result<bool> {
        let _guard = self.state_writes.lock().await;
        self.store_state(session_id, state).await
    }

    async fn record_attribution(
        &self,
        session_id: &str,
        key: ClueKey,
        user_id: Option<i64>,
        username: &str,
    ) -> Result<ClaimResult> {
        if self.session_puzzle_id(session_id).await?.is_none() {
            return Ok(ClaimResult::UnknownSession);
        }

        let attribution = Attribution::now(user_id, username);
        // The (session_id, clue_key) primary key turns this into compare-and-set.
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO clue_attributions (session_id, clue_key, user_id, username, claimed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(key.to_string())
        .bind(attribution.user_id)
        .bind(&attribution.username)
        .bind(&attribution.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to record attribution")?;

        if result.rows_affected() == 1 {
            Ok(ClaimResult::Claimed(attribution))
        } else {
            Ok(ClaimResult::AlreadyClaimed)
        }
    }

    async fn get_attributions(
        &self,
        session_id: &str,
    ) -> Result<Option<BTreeMap<String, Attribution>>> {
        if self.session_puzzle_id(session_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.load_attributions(session_id).await?))
    }
}
