use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::models::{Clue, Direction, Puzzle};

use super::{PuzzleRepository, now_unix};

fn clue_from_row(r: &SqliteRow) -> Result<Clue> {
    let direction: String = r.get("direction");
    Ok(Clue {
        number: r.get::<i64, _>("number") as u32,
        direction: direction.parse().map_err(anyhow::Error::msg)?,
        row: r.get::<i64, _>("row_index") as usize,
        col: r.get::<i64, _>("col_index") as usize,
        length: r.get::<i64, _>("length") as usize,
        text: r.get("text"),
        answer_encoded: r.get("answer_encoded"),
    })
}

impl PuzzleRepository {
    /// Store a puzzle and its already-assembled clues in one transaction.
    pub async fn insert_puzzle(
        &self,
        title: &str,
        layout: &[String],
        clues: &[Clue],
    ) -> Result<i64> {
        let (width, height) = crate::puzzle::dimensions(layout)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO puzzles (title, width, height, layout, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(width as i64)
        .bind(height as i64)
        .bind(serde_json::to_string(layout)?)
        .bind(now_unix())
        .execute(&mut *tx)
        .await
        .context("Failed to create puzzle")?;
        let puzzle_id = result.last_insert_rowid();

        for clue in clues {
            sqlx::query(
                r#"
                INSERT INTO clues (puzzle_id, number, direction, row_index, col_index, length, text, answer_encoded)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(puzzle_id)
            .bind(clue.number as i64)
            .bind(clue.direction.as_str())
            .bind(clue.row as i64)
            .bind(clue.col as i64)
            .bind(clue.length as i64)
            .bind(&clue.text)
            .bind(&clue.answer_encoded)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store clue {}", clue.key()))?;
        }

        tx.commit().await?;
        Ok(puzzle_id)
    }

    pub async fn get_puzzle(&self, id: i64) -> Result<Option<Puzzle>> {
        let row = sqlx::query(
            "SELECT id, title, width, height, layout, created_at FROM puzzles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let layout: String = r.get("layout");
            Ok(Puzzle {
                id: r.get("id"),
                title: r.get("title"),
                width: r.get::<i64, _>("width") as usize,
                height: r.get::<i64, _>("height") as usize,
                layout: serde_json::from_str(&layout).context("corrupt puzzle layout")?,
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }

    pub async fn get_clues(&self, puzzle_id: i64) -> Result<Vec<Clue>> {
        let rows = sqlx::query(
            r#"
            SELECT number, direction, row_index, col_index, length, text, answer_encoded
            FROM clues
            WHERE puzzle_id = ?
            ORDER BY direction ASC, number ASC
            "#,
        )
        .bind(puzzle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(clue_from_row).collect()
    }

    pub async fn get_clue(
        &self,
        puzzle_id: i64,
        number: u32,
        direction: Direction,
    ) -> Result<Option<Clue>> {
        let row = sqlx::query(
            r#"
            SELECT number, direction, row_index, col_index, length, text, answer_encoded
            FROM clues
            WHERE puzzle_id = ? AND number = ? AND direction = ?
            "#,
        )
        .bind(puzzle_id)
        .bind(number as i64)
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(clue_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use crate::models::Direction;
    use crate::repository::test_helpers::{sample_puzzle, test_repository};

    #[tokio::test]
    async fn test_insert_and_read_puzzle() {
        let repo = test_repository().await;
        let req = sample_puzzle();
        let clues = crate::puzzle::assemble_clues(&req.layout, &req.clues).unwrap();
        let id = repo.insert_puzzle(&req.title, &req.layout, &clues).await.unwrap();

        let puzzle = repo.get_puzzle(id).await.unwrap().unwrap();
        assert_eq!(puzzle.title, "Sample");
        assert_eq!((puzzle.width, puzzle.height), (4, 3));
        assert_eq!(puzzle.layout, req.layout);

        let stored = repo.get_clues(id).await.unwrap();
        assert_eq!(stored.len(), 4);
        // across sorts before down
        assert_eq!(stored[0].direction, Direction::Across);
        assert_eq!(stored[3].direction, Direction::Down);
    }

    #[tokio::test]
    async fn test_get_clue_by_key() {
        let repo = test_repository().await;
        let req = sample_puzzle();
        let clues = crate::puzzle::assemble_clues(&req.layout, &req.clues).unwrap();
        let id = repo.insert_puzzle(&req.title, &req.layout, &clues).await.unwrap();

        let clue = repo.get_clue(id, 2, Direction::Down).await.unwrap().unwrap();
        assert_eq!((clue.row, clue.col, clue.length), (0, 1, 3));
        assert_eq!(
            crate::puzzle::decode_answer(&clue.answer_encoded).unwrap(),
            "ABE"
        );
        assert!(repo.get_clue(id, 2, Direction::Across).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_puzzle() {
        let repo = test_repository().await;
        assert!(repo.get_puzzle(99).await.unwrap().is_none());
        assert!(repo.get_clues(99).await.unwrap().is_empty());
    }
}
