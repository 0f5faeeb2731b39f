use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::Row;

use crate::models::{ExplanationJob, JobStatus, JobSubject};

use super::{PuzzleRepository, now_unix};

impl PuzzleRepository {
    /// Persist a new job in `pending`.
    pub async fn create_job(&self, request_id: &str, subject: &JobSubject) -> Result<()> {
        let now = now_unix();
        sqlx::query(
            r#"
            INSERT INTO explanation_requests (request_id, subject_json, status, created_at, updated_at)
            VALUES (?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(serde_json::to_string(subject)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create explanation request")?;
        Ok(())
    }

    pub async fn get_job(&self, request_id: &str) -> Result<Option<ExplanationJob>> {
        let row = sqlx::query(
            r#"
            SELECT request_id, subject_json, status, result_json, error_message, created_at, updated_at
            FROM explanation_requests
            WHERE request_id = ?
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let subject: String = r.get("subject_json");
        let status: String = r.get("status");
        let result: Option<String> = r.get("result_json");

        Ok(Some(ExplanationJob {
            request_id: r.get("request_id"),
            subject: serde_json::from_str(&subject).context("corrupt job subject")?,
            status: status.parse().map_err(anyhow::Error::msg)?,
            result_payload: result
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("corrupt job result")?,
            error_message: r.get("error_message"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// `pending → success`. Returns false if the job was already terminal or unknown.
    pub async fn complete_job_success(&self, request_id: &str, payload: &Value) -> Result<bool> {
        self.finish_job(request_id, JobStatus::Success, Some(payload.to_string()), None)
            .await
    }

    /// `pending → error`. Returns false if the job was already terminal or unknown.
    pub async fn complete_job_error(&self, request_id: &str, message: &str) -> Result<bool> {
        self.finish_job(request_id, JobStatus::Error, None, Some(message))
            .await
    }

    async fn finish_job(
        &self,
        request_id: &str,
        status: JobStatus,
        result_json: Option<String>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        // Guarded on status so a terminal row is never rewritten.
        let result = sqlx::query(
            r#"
            UPDATE explanation_requests
            SET status = ?, result_json = ?, error_message = ?, updated_at = ?
            WHERE request_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(result_json)
        .bind(error_message)
        .bind(now_unix())
        .bind(request_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark request {request_id} {}", status.as_str()))?;
        Ok(result.rows_affected() > 0)
    }
}
