use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppJson, AppResult};
use crate::jobs::{ExplanationInput, JobOrigin, JobRequest};
use crate::models::{Direction, JobStatus, JobSubject};
use crate::puzzle::decode_answer;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    clue_number: u32,
    direction: Direction,
    #[serde(default)]
    cached_only: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    clue_number: u32,
    direction: Direction,
    feedback: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    clue_number: u32,
    direction: Direction,
    reason: String,
}

/// Generator input for a stored clue. 404 if the clue does not exist.
pub(crate) async fn clue_input(
    state: &AppState,
    puzzle_id: i64,
    clue_number: u32,
    direction: Direction,
) -> AppResult<ExplanationInput> {
    let clue = state
        .repository
        .get_clue(puzzle_id, clue_number, direction)
        .await?
        .ok_or_else(|| AppError::not_found(format!("clue {clue_number}-{direction} not found")))?;
    Ok(ExplanationInput {
        clue_text: clue.text,
        answer: decode_answer(&clue.answer_encoded)?,
        previous: None,
        feedback: None,
    })
}

async fn session_puzzle(state: &AppState, session_id: &str) -> AppResult<i64> {
    state
        .repository
        .session_puzzle_id(session_id)
        .await?
        .ok_or_else(|| AppError::not_found("session not found"))
}

pub(crate) fn accepted(request_id: String) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "processing": true, "requestId": request_id })),
    )
        .into_response()
}

/// Serve a cached explanation, or start generating one.
pub async fn explain_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<ExplainRequest>,
) -> AppResult<Response> {
    let puzzle_id = session_puzzle(&state, &session_id).await?;
    let input = clue_input(&state, puzzle_id, req.clue_number, req.direction).await?;

    if let Some(explanation) = state
        .repository
        .get_cached_explanation(puzzle_id, req.clue_number, req.direction)
        .await?
    {
        return Ok(Json(json!({ "cached": true, "explanation": explanation })).into_response());
    }
    if req.cached_only {
        return Ok(Json(json!({ "cached": false, "explanation": Value::Null })).into_response());
    }

    let request_id = state
        .jobs
        .submit(JobRequest {
            subject: JobSubject::Clue {
                puzzle_id,
                clue_number: req.clue_number,
                direction: req.direction,
            },
            input,
            origin: JobOrigin::Session(session_id),
        })
        .await?;
    Ok(accepted(request_id))
}

/// Generate a replacement explanation, feeding the current one back as context.
pub async fn regenerate_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<RegenerateRequest>,
) -> AppResult<Response> {
    let puzzle_id = session_puzzle(&state, &session_id).await?;
    let mut input = clue_input(&state, puzzle_id, req.clue_number, req.direction).await?;
    input.previous = state
        .repository
        .get_cached_explanation(puzzle_id, req.clue_number, req.direction)
        .await?;
    input.feedback = req.feedback.filter(|f| !f.trim().is_empty());

    let request_id = state
        .jobs
        .submit(JobRequest {
            subject: JobSubject::Clue {
                puzzle_id,
                clue_number: req.clue_number,
                direction: req.direction,
            },
            input,
            origin: JobOrigin::Session(session_id),
        })
        .await?;
    Ok(accepted(request_id))
}

pub async fn report_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<ReportRequest>,
) -> AppResult<impl IntoResponse> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("reason is required"));
    }
    let puzzle_id = session_puzzle(&state, &session_id).await?;
    // Only real clues can be reported.
    clue_input(&state, puzzle_id, req.clue_number, req.direction).await?;

    let id = state
        .repository
        .create_report(
            puzzle_id,
            req.clue_number,
            req.direction,
            Some(&session_id),
            reason,
        )
        .await?;
    info!(session_id = %session_id, report_id = id, "explanation reported");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

/// Poll a job by request id. Terminal jobs always return the same body.
pub async fn job_status_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .repository
        .get_job(&request_id)
        .await?
        .ok_or_else(|| AppError::not_found("request not found"))?;

    let body = match job.status {
        JobStatus::Pending => json!({
            "status": job.status.as_str(),
            "message": "Explanation is still being generated",
        }),
        JobStatus::Success => json!({
            "status": job.status.as_str(),
            "explanation": job.result_payload,
        }),
        JobStatus::Error => json!({
            "status": job.status.as_str(),
            "error": job.error_message,
        }),
    };
    Ok(Json(body))
}
