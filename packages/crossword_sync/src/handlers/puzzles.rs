use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use crate::AppState;
use crate::error::{AppError, AppJson, AppResult};
use crate::models::CreatePuzzleRequest;
use crate::puzzle::{ClueError, assemble_clues};

impl From<ClueError> for AppError {
    fn from(e: ClueError) -> Self {
        AppError::bad_request(e.to_string())
    }
}

pub async fn create_puzzle_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreatePuzzleRequest>,
) -> AppResult<impl IntoResponse> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    let clues = assemble_clues(&req.layout, &req.clues)?;
    let id = state
        .repository
        .insert_puzzle(title, &req.layout, &clues)
        .await?;

    info!(puzzle_id = id, clues = clues.len(), "puzzle created");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Geometry and clue text. Answers never leave the server.
pub async fn get_puzzle_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let puzzle = state
        .repository
        .get_puzzle(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("puzzle {id} not found")))?;
    let clues = state.repository.get_clues(id).await?;
    Ok(Json(json!({ "puzzle": puzzle, "clues": clues })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::Request,
        routing::{get, post},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn router(state: crate::AppState) -> Router {
        Router::new()
            .route("/puzzles", post(create_puzzle_handler))
            .route("/puzzles/{id}", get(get_puzzle_handler))
            .with_state(state)
    }

    async fn post_puzzle(app: &Router, body: Value) -> (StatusCode, Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/puzzles")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_create_then_get_hides_answers() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = router(state);

        let (status, created) = post_puzzle(
            &app,
            json!({
                "title": "Mini",
                "layout": ["..", ".."],
                "clues": [
                    { "number": 1, "direction": "across", "text": "Greeting", "answer": "hi" },
                    { "number": 1, "direction": "down", "text": "Hello, informally", "answer": "HO" }
                ]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/puzzles/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("answer"));
        assert!(!text.contains("HI"));

        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["puzzle"]["width"], 2);
        assert_eq!(json["clues"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_answer_that_does_not_fit() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = router(state);

        let (status, body) = post_puzzle(
            &app,
            json!({
                "title": "Mini",
                "layout": ["..", ".."],
                "clues": [
                    { "number": 1, "direction": "across", "text": "Greeting", "answer": "hey" }
                ]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("1-across"));
    }

    #[tokio::test]
    async fn test_unknown_puzzle_is_404() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let resp = router(state)
            .oneshot(Request::builder().uri("/puzzles/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
