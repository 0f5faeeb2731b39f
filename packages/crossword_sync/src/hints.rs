//! Hint reveals and completion detection.
//!
//! A reveal decodes the stored answer and writes through the same
//! persist-then-broadcast path as a manual edit, so other clients cannot tell
//! the difference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::{Clue, ClueKey, cell_at};
use crate::puzzle::decode_answer;
use crate::repository::PuzzleRepository;
use crate::sync::SessionSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintKind {
    Letter,
    Word,
}

/// What to reveal: one cell for letters, one clue for words.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HintTarget {
    Cell {
        row: usize,
        col: usize,
    },
    #[serde(rename_all = "camelCase")]
    Clue { clue_key: ClueKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealedCell {
    pub row: usize,
    pub col: usize,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reveal {
    pub cells: Vec<RevealedCell>,
    /// False for dry runs.
    pub applied: bool,
    pub is_complete: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RevealError {
    #[error("session not found")]
    UnknownSession,
    #[error("no clue covers cell ({row}, {col})")]
    NoClueAtCell { row: usize, col: usize },
    #[error("clue {0} not found")]
    UnknownClue(ClueKey),
    #[error("letter hints take a {{row, col}} target and word hints a {{clueKey}} target")]
    TargetMismatch,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<RevealError> for AppError {
    fn from(e: RevealError) -> Self {
        match e {
            RevealError::UnknownSession => AppError::not_found(e.to_string()),
            RevealError::NoClueAtCell { .. } | RevealError::UnknownClue(_) => {
                AppError::not_found(e.to_string())
            }
            RevealError::TargetMismatch => AppError::bad_request(e.to_string()),
            RevealError::Internal(inner) => AppError::Internal(inner),
        }
    }
}

/// The answer letter a clue places at each of its cells.
fn answer_cells(clue: &Clue) -> anyhow::Result<Vec<RevealedCell>> {
    let answer = decode_answer(&clue.answer_encoded)?;
    Ok(clue
        .cells()
        .zip(answer.chars())
        .map(|((row, col), letter)| RevealedCell {
            row,
            col,
            value: letter.to_string(),
        })
        .collect())
}

pub struct Revealer {
    repository: Arc<PuzzleRepository>,
    sessions: Arc<SessionSync>,
}

impl Revealer {
    pub fn new(repository: Arc<PuzzleRepository>, sessions: Arc<SessionSync>) -> Self {
        Self {
            repository,
            sessions,
        }
    }

    pub async fn reveal(
        &self,
        session_id: &str,
        kind: HintKind,
        target: &HintTarget,
        dry_run: bool,
        sender_id: Option<&str>,
    ) -> Result<Reveal, RevealError> {
        let puzzle_id = self
            .repository
            .session_puzzle_id(session_id)
            .await?
            .ok_or(RevealError::UnknownSession)?;
        let clues = self.repository.get_clues(puzzle_id).await?;

        let cells = match (kind, target) {
            (HintKind::Letter, HintTarget::Cell { row, col }) => {
                let (row, col) = (*row, *col);
                let clue = clues
                    .iter()
                    .find(|c| c.cells().any(|cell| cell == (row, col)))
                    .ok_or(RevealError::NoClueAtCell { row, col })?;
                answer_cells(clue)?
                    .into_iter()
                    .filter(|c| c.row == row && c.col == col)
                    .collect()
            }
            (HintKind::Word, HintTarget::Clue { clue_key }) => {
                let clue = clues
                    .iter()
                    .find(|c| c.key() == *clue_key)
                    .ok_or(RevealError::UnknownClue(*clue_key))?;
                answer_cells(clue)?
            }
            _ => return Err(RevealError::TargetMismatch),
        };

        if dry_run {
            debug!(session_id, cells = cells.len(), "hint dry run");
            let is_complete = self.evaluate(session_id, &clues).await?;
            return Ok(Reveal {
                cells,
                applied: false,
                is_complete,
            });
        }

        for cell in &cells {
            self.sessions
                .apply_cell(session_id, cell.row, cell.col, &cell.value, sender_id)
                .await?;
        }
        info!(session_id, ?kind, cells = cells.len(), "hint revealed");

        let is_complete = self.store_completion(session_id, &clues).await?;
        Ok(Reveal {
            cells,
            applied: true,
            is_complete,
        })
    }

    /// Recompute and persist whether every clue is filled correctly.
    /// Returns `None` for an unknown session.
    pub async fn refresh_completion(&self, session_id: &str) -> anyhow::Result<Option<bool>> {
        let Some(puzzle_id) = self.repository.session_puzzle_id(session_id).await? else {
            return Ok(None);
        };
        let clues = self.repository.get_clues(puzzle_id).await?;
        Ok(Some(self.store_completion(session_id, &clues).await?))
    }

    async fn store_completion(&self, session_id: &str, clues: &[Clue]) -> anyhow::Result<bool> {
        let complete = self.evaluate(session_id, clues).await?;
        self.repository.set_complete(session_id, complete).await?;
        if complete {
            info!(session_id, "puzzle complete");
        }
        Ok(complete)
    }

    async fn evaluate(&self, session_id: &str, clues: &[Clue]) -> anyhow::Result<bool> {
        let Some(state) = self.sessions.snapshot(session_id).await? else {
            return Ok(false);
        };
        if clues.is_empty() {
            return Ok(false);
        }
        for clue in clues {
            for cell in answer_cells(clue)? {
                let filled = cell_at(&state, cell.row, cell.col).to_ascii_uppercase();
                if cell.value.chars().next() != Some(filled) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServerMetrics;
    use crate::models::Direction;
    use crate::repository::test_helpers::seeded_repository;
    use crate::sync::SyncHub;
    use tokio::sync::mpsc;

    async fn setup() -> (Revealer, SyncHub, Arc<PuzzleRepository>, String) {
        let (repo, _, sid) = seeded_repository().await;
        let repo = Arc::new(repo);
        let hub = SyncHub::new(repo.clone(), Arc::new(ServerMetrics::new()));
        (
            Revealer::new(repo.clone(), hub.sessions.clone()),
            hub,
            repo,
            sid,
        )
    }

    #[tokio::test]
    async fn dry_run_returns_letter_without_writing() {
        let (revealer, hub, _, sid) = setup().await;
        let r = revealer
            .reveal(
                &sid,
                HintKind::Letter,
                &HintTarget::Cell { row: 1, col: 2 },
                true,
                None,
            )
            .await
            .unwrap();
        assert!(!r.applied);
        assert_eq!(
            r.cells,
            vec![RevealedCell {
                row: 1,
                col: 2,
                value: "O".into()
            }]
        );
        assert_eq!(hub.sessions.snapshot(&sid).await.unwrap().unwrap()[1], "    ");
    }

    #[tokio::test]
    async fn word_reveal_broadcasts_like_manual_edits() {
        let (revealer, hub, _, sid) = setup().await;
        let (tx, mut rx) = mpsc::channel(16);
        hub.streams.add(&sid, tx);

        let key = ClueKey::new(2, Direction::Down);
        let r = revealer
            .reveal(&sid, HintKind::Word, &HintTarget::Clue { clue_key: key }, false, Some("hint"))
            .await
            .unwrap();
        assert!(r.applied);
        assert_eq!(r.cells.len(), 3);

        let state = hub.sessions.snapshot(&sid).await.unwrap().unwrap();
        assert_eq!(state, vec![" A  ", " B  ", " E  "]);

        for _ in 0..3 {
            let (name, _) = crate::test_helpers::sse_parts(rx.try_recv().unwrap());
            assert_eq!(name, "cell_updated");
        }
    }

    #[tokio::test]
    async fn completion_tracks_correct_fill() {
        let (revealer, hub, repo, sid) = setup().await;
        hub.sessions
            .replace_state(
                &sid,
                &["cat ".to_string(), "OBOE".to_string(), " EN ".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(revealer.refresh_completion(&sid).await.unwrap(), Some(false));

        hub.sessions.apply_cell(&sid, 2, 3, "D", None).await.unwrap();
        assert_eq!(revealer.refresh_completion(&sid).await.unwrap(), Some(true));
        assert!(repo.get_session(&sid).await.unwrap().unwrap().is_complete);

        assert_eq!(revealer.refresh_completion("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mismatched_targets_are_rejected() {
        let (revealer, _, _, sid) = setup().await;
        let err = revealer
            .reveal(&sid, HintKind::Word, &HintTarget::Cell { row: 0, col: 0 }, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RevealError::TargetMismatch));

        let err = revealer
            .reveal(&sid, HintKind::Letter, &HintTarget::Cell { row: 0, col: 3 }, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RevealError::NoClueAtCell { row: 0, col: 3 }));

        let err = revealer
            .reveal("ghost", HintKind::Letter, &HintTarget::Cell { row: 0, col: 0 }, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RevealError::UnknownSession));
    }

    #[test]
    fn parses_targets() {
        let t: HintTarget = serde_json::from_str(r#"{"row":1,"col":2}"#).unwrap();
        assert_eq!(t, HintTarget::Cell { row: 1, col: 2 });
        let t: HintTarget = serde_json::from_str(r#"{"clueKey":"4-across"}"#).unwrap();
        assert_eq!(
            t,
            HintTarget::Clue {
                clue_key: ClueKey::new(4, Direction::Across)
            }
        );
    }
}
