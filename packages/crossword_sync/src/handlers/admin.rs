//! Out-of-session tools. Job results go to the socket topic the caller names,
//! which the admin client joins with `join_session` beforehand.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::error;

use crate::AppState;
use crate::error::{AppError, AppJson, AppResult};
use crate::jobs::{ExplanationInput, JobOrigin, JobRequest};
use crate::models::{Direction, JobSubject};

use super::explanations::{accepted, clue_input};

pub async fn get_database_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.db.get_stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Failed to get database stats: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn list_reports_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.repository.list_open_reports().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRegenerateRequest {
    puzzle_id: i64,
    clue_number: u32,
    direction: Direction,
    feedback: Option<String>,
    socket_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHocRequest {
    clue_text: String,
    answer: String,
    socket_id: String,
}

fn socket_topic(socket_id: &str) -> AppResult<JobOrigin> {
    let topic = socket_id.trim();
    if topic.is_empty() {
        return Err(AppError::bad_request("socketId is required"));
    }
    Ok(JobOrigin::SocketTopic(topic.to_string()))
}

pub async fn admin_regenerate_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<AdminRegenerateRequest>,
) -> AppResult<Response> {
    let origin = socket_topic(&req.socket_id)?;
    let mut input = clue_input(&state, req.puzzle_id, req.clue_number, req.direction).await?;
    input.previous = state
        .repository
        .get_cached_explanation(req.puzzle_id, req.clue_number, req.direction)
        .await?;
    input.feedback = req.feedback.filter(|f| !f.trim().is_empty());

    let request_id = state
        .jobs
        .submit(JobRequest {
            subject: JobSubject::Clue {
                puzzle_id: req.puzzle_id,
                clue_number: req.clue_number,
                direction: req.direction,
            },
            input,
            origin,
        })
        .await?;
    Ok(accepted(request_id))
}

/// Explain arbitrary clue text. Nothing is cached.
pub async fn admin_adhoc_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<AdHocRequest>,
) -> AppResult<Response> {
    let origin = socket_topic(&req.socket_id)?;
    let clue_text = req.clue_text.trim().to_string();
    let answer = req.answer.trim().to_uppercase();
    if clue_text.is_empty() || answer.is_empty() {
        return Err(AppError::bad_request("clueText and answer are required"));
    }

    let request_id = state
        .jobs
        .submit(JobRequest {
            subject: JobSubject::AdHoc {
                clue_text: clue_text.clone(),
                answer: answer.clone(),
            },
            input: ExplanationInput {
                clue_text,
                answer,
                previous: None,
                feedback: None,
            },
            origin,
        })
        .await?;
    Ok(accepted(request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Explainer;
    use async_trait::async_trait;
    use axum::{
        Router,
        body::Body,
        http::Request,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl Explainer for Echo {
        async fn explain(&self, input: &ExplanationInput) -> anyhow::Result<Value> {
            Ok(json!({ "answer": input.answer }))
        }
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/admin/stats", get(get_database_stats))
            .route("/admin/reports", get(list_reports_handler))
            .route("/admin/explanations", post(admin_adhoc_handler))
            .route("/admin/explanations/regenerate", post(admin_regenerate_handler))
            .with_state(state)
    }

    async fn call(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = match body {
            Some(b) => Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => Request::builder().uri(uri).body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_adhoc_result_goes_to_socket_topic() {
        let (state, _tmp) =
            crate::test_helpers::test_app_state_with_explainer(Arc::new(Echo)).await;
        let (tx, mut rx) = mpsc::channel(16);
        state.sync.sockets.add("admin-7", tx);
        let app = router(state);

        let (status, ack) = call(
            &app,
            "/admin/explanations",
            Some(json!({ "clueText": "Wind instrument", "answer": "oboe", "socketId": "admin-7" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "explanation_ready");
        assert_eq!(frame["requestId"], ack["requestId"]);
        assert_eq!(frame["explanation"]["answer"], "OBOE");
        assert_eq!(frame["success"], true);
        assert!(frame["clueNumber"].is_null());
    }

    #[tokio::test]
    async fn test_regenerate_validates_input() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let (puzzle_id, _) = crate::test_helpers::seed_session(&state).await;
        let app = router(state);

        let (status, _) = call(
            &app,
            "/admin/explanations/regenerate",
            Some(json!({ "puzzleId": puzzle_id, "clueNumber": 1, "direction": "across", "socketId": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "/admin/explanations/regenerate",
            Some(json!({ "puzzleId": puzzle_id, "clueNumber": 3, "direction": "across", "socketId": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, ack) = call(
            &app,
            "/admin/explanations/regenerate",
            Some(json!({ "puzzleId": puzzle_id, "clueNumber": 1, "direction": "across", "socketId": "a" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(ack["requestId"].is_string());
    }

    #[tokio::test]
    async fn test_stats_and_reports() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let (puzzle_id, sid) = crate::test_helpers::seed_session(&state).await;
        state
            .repository
            .create_report(puzzle_id, 1, Direction::Across, Some(&sid), "typo")
            .await
            .unwrap();
        let app = router(state);

        let (status, stats) = call(&app, "/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["puzzles"], 1);
        assert_eq!(stats["sessions"], 1);

        let (_, reports) = call(&app, "/admin/reports", None).await;
        assert_eq!(reports[0]["reason"], "typo");
        assert_eq!(reports[0]["clueNumber"], 1);
    }
}
