use std::convert::Infallible;
use std::sync::Arc;

use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};

use crate::AppState;
use crate::config::{SyncConfig, SyncFileConfig, XwordConfig};
use crate::db::Database;
use crate::hints::Revealer;
use crate::jobs::{Explainer, JobRunner, explainer::UnconfiguredExplainer};
use crate::metrics::ServerMetrics;
use crate::repository::PuzzleRepository;
use crate::sync::SyncHub;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Explanation jobs fail with "not configured".
///
/// Callers must hold the returned `TempDir` for the lifetime of the test.
pub async fn test_app_state() -> (AppState, tempfile::TempDir) {
    test_app_state_with_explainer(Arc::new(UnconfiguredExplainer)).await
}

/// Like `test_app_state`, with a caller-supplied explanation generator.
pub async fn test_app_state_with_explainer(
    explainer: Arc<dyn Explainer>,
) -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = XwordConfig::new(Some(tmp.path().to_path_buf())).expect("config");

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let metrics = Arc::new(ServerMetrics::new());
    let db = Arc::new(Database { pool: pool.clone() });
    let repository = Arc::new(PuzzleRepository::new(pool));
    let sync = SyncHub::new(repository.clone(), metrics.clone());
    let revealer = Arc::new(Revealer::new(repository.clone(), sync.sessions.clone()));
    let jobs = Arc::new(JobRunner::new(
        repository.clone(),
        explainer,
        sync.broadcaster.clone(),
        metrics.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        sync_config: Arc::new(SyncConfig::from_file(&SyncFileConfig::default())),
        metrics,
        db,
        repository,
        sync,
        revealer,
        jobs,
    };

    (state, tmp)
}

/// Store the sample puzzle and open one blank session on it.
/// Returns `(puzzle_id, session_id)`.
pub async fn seed_session(state: &AppState) -> (i64, String) {
    let req = crate::repository::test_helpers::sample_puzzle();
    let clues = crate::puzzle::assemble_clues(&req.layout, &req.clues).expect("clues fit");
    let puzzle_id = state
        .repository
        .insert_puzzle(&req.title, &req.layout, &clues)
        .await
        .expect("create puzzle");
    let session = state
        .repository
        .create_session(puzzle_id, None, None)
        .await
        .expect("create session")
        .expect("puzzle exists");
    (puzzle_id, session.session_id)
}

/// Render one push-stream frame exactly as it goes out on the wire.
pub fn sse_text(event: Event) -> String {
    let frames = futures::stream::iter([Ok::<_, Infallible>(event)]);
    let body = Sse::new(frames).into_response().into_body();
    let bytes = futures::executor::block_on(axum::body::to_bytes(body, usize::MAX))
        .expect("sse body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 frame")
}

/// Split a rendered push-stream frame into its event name and JSON data.
pub fn sse_parts(event: Event) -> (String, serde_json::Value) {
    let text = sse_text(event);
    let mut name = String::new();
    let mut data = serde_json::Value::Null;
    for line in text.lines() {
        if let Some(n) = line.strip_prefix("event: ") {
            name = n.to_string();
        } else if let Some(d) = line.strip_prefix("data: ") {
            data = serde_json::from_str(d).expect("json data");
        }
    }
    (name, data)
}
