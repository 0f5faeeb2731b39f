use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::XwordConfig;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &XwordConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&config.db_url())
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.db_url()))?;

        info!("Running database migrations...");
        self::run_migrations(&pool).await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        info!("Database initialized successfully");

        Ok(Self { pool })
    }

    pub async fn get_stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM puzzles) as puzzle_count,
                (SELECT COUNT(*) FROM puzzle_sessions) as session_count,
                (SELECT COUNT(*) FROM explanation_requests WHERE status = 'pending') as pending_jobs,
                (SELECT COUNT(*) FROM clue_explanations) as cached_explanations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DbStats {
            puzzles: row.try_get::<i64, _>("puzzle_count").unwrap_or(0) as u64,
            sessions: row.try_get::<i64, _>("session_count").unwrap_or(0) as u64,
            pending_jobs: row.try_get::<i64, _>("pending_jobs").unwrap_or(0) as u64,
            cached_explanations: row.try_get::<i64, _>("cached_explanations").unwrap_or(0)
                as u64,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub puzzles: u64,
    pub sessions: u64,
    pub pending_jobs: u64,
    pub cached_explanations: u64,
}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    // Puzzle geometry; `layout` is a JSON array of rows with '#' for blocks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS puzzles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            layout TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clues (
            puzzle_id INTEGER NOT NULL REFERENCES puzzles(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('across', 'down')),
            row_index INTEGER NOT NULL,
            col_index INTEGER NOT NULL,
            length INTEGER NOT NULL,
            text TEXT NOT NULL,
            answer_encoded TEXT NOT NULL,
            PRIMARY KEY (puzzle_id, number, direction)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fill state is a JSON array of row strings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS puzzle_sessions (
            session_id TEXT PRIMARY KEY,
            puzzle_id INTEGER NOT NULL REFERENCES puzzles(id) ON DELETE CASCADE,
            owner_user_id INTEGER,
            anonymous_id TEXT,
            state TEXT NOT NULL,
            is_complete INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_puzzle ON puzzle_sessions(puzzle_id)")
        .execute(pool)
        .await?;

    // One row per claimed clue; the primary key makes claims first-write-wins
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clue_attributions (
            session_id TEXT NOT NULL REFERENCES puzzle_sessions(session_id) ON DELETE CASCADE,
            clue_key TEXT NOT NULL,
            user_id INTEGER,
            username TEXT NOT NULL,
            claimed_at TEXT NOT NULL,
            PRIMARY KEY (session_id, clue_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Job bookkeeping for background explanation requests
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS explanation_requests (
            request_id TEXT PRIMARY KEY,
            subject_json TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'success', 'error')),
            result_json TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_explanation_requests_status ON explanation_requests(status)",
    )
    .execute(pool)
    .await?;

    // Accepted explanations, independent of job bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clue_explanations (
            puzzle_id INTEGER NOT NULL REFERENCES puzzles(id) ON DELETE CASCADE,
            clue_number INTEGER NOT NULL,
            direction TEXT NOT NULL,
            explanation_json TEXT NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE (puzzle_id, clue_number, direction)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS explanation_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            puzzle_id INTEGER NOT NULL REFERENCES puzzles(id) ON DELETE CASCADE,
            clue_number INTEGER NOT NULL,
            direction TEXT NOT NULL,
            session_id TEXT,
            reason TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            resolved_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reports_clue ON explanation_reports(puzzle_id, clue_number, direction, resolved)",
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, description) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind("Initial crossword schema")
        .execute(pool)
        .await?;

    Ok(())
}
