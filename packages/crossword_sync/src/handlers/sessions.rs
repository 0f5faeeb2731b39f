use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppJson, AppResult};
use crate::hints::{HintKind, HintTarget};
use crate::models::{ClueKey, Row};
use crate::sync::{CellWrite, ClaimResult};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    puzzle_id: i64,
    user_id: Option<i64>,
    anonymous_id: Option<String>,
}

pub async fn create_session_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> AppResult<impl IntoResponse> {
    let session = state
        .repository
        .create_session(req.puzzle_id, req.user_id, req.anonymous_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("puzzle {} not found", req.puzzle_id)))?;

    info!(session_id = %session.session_id, puzzle_id = session.puzzle_id, "session created");
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = state
        .repository
        .get_session(&session_id)
        .await?
        .ok_or_else(|| AppError::not_found("session not found"))?;
    Ok(Json(session))
}

/// Fields are optional so a missing one is a 400 with a readable message.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCellRequest {
    r: Option<usize>,
    c: Option<usize>,
    value: Option<String>,
    sender_id: Option<String>,
}

pub async fn update_cell_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<UpdateCellRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(r), Some(c), Some(value)) = (req.r, req.c, req.value) else {
        return Err(AppError::bad_request("r, c and value are required"));
    };

    let write = state
        .sync
        .sessions
        .apply_cell(&session_id, r, c, &value, req.sender_id.as_deref())
        .await?;
    match write {
        CellWrite::Stored => {}
        CellWrite::OutOfRange => {
            return Err(AppError::bad_request(format!(
                "cell ({r}, {c}) is outside the grid"
            )));
        }
        CellWrite::UnknownSession => return Err(AppError::not_found("session not found")),
    }

    refresh_completion(&state, &session_id).await;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceStateRequest {
    state: Vec<Row>,
    sender_id: Option<String>,
}

pub async fn replace_state_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<ReplaceStateRequest>,
) -> AppResult<impl IntoResponse> {
    let replaced = state
        .sync
        .sessions
        .replace_state(&session_id, &req.state, req.sender_id.as_deref())
        .await?;
    if !replaced {
        return Err(AppError::not_found("session not found"));
    }

    refresh_completion(&state, &session_id).await;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    clue_key: Option<String>,
    user_id: Option<i64>,
    username: Option<String>,
}

pub async fn claim_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<ClaimRequest>,
) -> AppResult<impl IntoResponse> {
    let key: ClueKey = req
        .clue_key
        .as_deref()
        .ok_or_else(|| AppError::bad_request("clueKey is required"))?
        .parse()
        .map_err(AppError::bad_request)?;
    let username = req
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::bad_request("username is required"))?;

    match state
        .sync
        .attributions
        .claim(&session_id, key, req.user_id, username)
        .await?
    {
        ClaimResult::Claimed(attribution) => Ok(Json(json!({
            "success": true,
            "claimed": true,
            "attribution": attribution,
        }))),
        ClaimResult::AlreadyClaimed => Ok(Json(json!({ "success": true, "claimed": false }))),
        ClaimResult::UnknownSession => Err(AppError::not_found("session not found")),
    }
}

pub async fn attributions_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let attributions = state
        .sync
        .sessions
        .store()
        .get_attributions(&session_id)
        .await?
        .ok_or_else(|| AppError::not_found("session not found"))?;
    Ok(Json(json!({ "attributions": attributions })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintRequest {
    #[serde(rename = "type")]
    kind: HintKind,
    target: HintTarget,
    #[serde(default)]
    dry_run: bool,
    sender_id: Option<String>,
}

pub async fn hint_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<HintRequest>,
) -> AppResult<impl IntoResponse> {
    let reveal = state
        .revealer
        .reveal(
            &session_id,
            req.kind,
            &req.target,
            req.dry_run,
            req.sender_id.as_deref(),
        )
        .await?;
    Ok(Json(reveal))
}

/// Completion is advisory; a failure here never fails the edit that triggered it.
async fn refresh_completion(state: &AppState, session_id: &str) {
    if let Err(e) = state.revealer.refresh_completion(session_id).await {
        warn!(session_id, "Failed to refresh completion: {:#}", e);
    }
}
