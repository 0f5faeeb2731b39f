// Repository layer: each domain lives in its own file with `impl PuzzleRepository`.

use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use tokio::sync::Mutex;

mod explanations;
mod jobs;
mod puzzles;
mod sessions;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct PuzzleRepository {
    pub(crate) pool: SqlitePool,
    /// Serializes read-modify-write of session state so concurrent edits to
    /// different cells of one session never overwrite each other.
    state_writes: Arc<Mutex<()>>,
}

impl PuzzleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            state_writes: Arc::new(Mutex::new(())),
        }
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
