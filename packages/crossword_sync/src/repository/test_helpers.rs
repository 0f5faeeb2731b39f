use sqlx::sqlite::SqlitePoolOptions;

use crate::models::{CreatePuzzleRequest, Direction, NewClue};

/// Create a fresh PuzzleRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::PuzzleRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::PuzzleRepository::new(pool)
}

/// A 4x3 grid:
///
/// ```text
/// C A T #
/// O B O E
/// # E N D
/// ```
///
/// with clues 1-across CAT, 4-across OBOE, 6-across END, 2-down ABE.
pub fn sample_puzzle() -> CreatePuzzleRequest {
    let clue = |number, direction, text: &str, answer: &str| NewClue {
        number,
        direction,
        text: text.into(),
        answer: answer.into(),
    };
    CreatePuzzleRequest {
        title: "Sample".into(),
        layout: vec!["...#".into(), "....".into(), "#...".into()],
        clues: vec![
            clue(1, Direction::Across, "Feline", "cat"),
            clue(4, Direction::Across, "Double reed", "oboe"),
            clue(6, Direction::Across, "Finish", "end"),
            clue(2, Direction::Down, "Honest president", "abe"),
        ],
    }
}

/// Repository seeded with [`sample_puzzle`] and one blank session.
/// Returns `(repository, puzzle_id, session_id)`.
pub async fn seeded_repository() -> (super::PuzzleRepository, i64, String) {
    let repo = test_repository().await;
    let req = sample_puzzle();
    let clues = crate::puzzle::assemble_clues(&req.layout, &req.clues).expect("clues fit");
    let puzzle_id = repo
        .insert_puzzle(&req.title, &req.layout, &clues)
        .await
        .expect("create puzzle");
    let session = repo
        .create_session(puzzle_id, None, Some("anon-1".into()))
        .await
        .expect("create session")
        .expect("puzzle exists");
    (repo, puzzle_id, session.session_id)
}
