use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::Row;

use crate::models::{Direction, ExplanationReport};

use super::{PuzzleRepository, now_unix};

impl PuzzleRepository {
    /// The accepted explanation for a clue, if one has been generated.
    pub async fn get_cached_explanation(
        &self,
        puzzle_id: i64,
        clue_number: u32,
        direction: Direction,
    ) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT explanation_json FROM clue_explanations
            WHERE puzzle_id = ? AND clue_number = ? AND direction = ?
            "#,
        )
        .bind(puzzle_id)
        .bind(clue_number as i64)
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|s| serde_json::from_str(&s).context("corrupt cached explanation"))
            .transpose()
    }

    pub async fn upsert_explanation(
        &self,
        puzzle_id: i64,
        clue_number: u32,
        direction: Direction,
        explanation: &Value,
    ) -> Result<()> {
        let now = now_unix();
        sqlx::query(
            r#"
            INSERT INTO clue_explanations (puzzle_id, clue_number, direction, explanation_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(puzzle_id, clue_number, direction) DO UPDATE SET
                explanation_json = excluded.explanation_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(puzzle_id)
        .bind(clue_number as i64)
        .bind(direction.as_str())
        .bind(explanation.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to cache explanation")?;
        Ok(())
    }

    pub async fn create_report(
        &self,
        puzzle_id: i64,
        clue_number: u32,
        direction: Direction,
        session_id: Option<&str>,
        reason: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO explanation_reports (puzzle_id, clue_number, direction, session_id, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(puzzle_id)
        .bind(clue_number as i64)
        .bind(direction.as_str())
        .bind(session_id)
        .bind(reason)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("Failed to file explanation report")?;
        Ok(result.last_insert_rowid())
    }

    /// Mark every open report for a clue resolved. Returns how many were closed.
    pub async fn resolve_reports(
        &self,
        puzzle_id: i64,
        clue_number: u32,
        direction: Direction,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE explanation_reports
            SET resolved = 1, resolved_at = ?
            WHERE puzzle_id = ? AND clue_number = ? AND direction = ? AND resolved = 0
            "#,
        )
        .bind(now_unix())
        .bind(puzzle_id)
        .bind(clue_number as i64)
        .bind(direction.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_open_reports(&self) -> Result<Vec<ExplanationReport>> {
        let rows = sqlx::query(
            r#"
            SELECT id, puzzle_id, clue_number, direction, session_id, reason, resolved, created_at
            FROM explanation_reports
            WHERE resolved = 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let direction: String = r.get("direction");
                Ok(ExplanationReport {
                    id: r.get("id"),
                    puzzle_id: r.get("puzzle_id"),
                    clue_number: r.get::<i64, _>("clue_number") as u32,
                    direction: direction.parse().map_err(anyhow::Error::msg)?,
                    session_id: r.get("session_id"),
                    reason: r.get("reason"),
                    resolved: r.get::<i32, _>("resolved") != 0,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}
