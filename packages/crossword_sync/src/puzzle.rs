//! Grid geometry and answer storage.
//!
//! Numbering follows the usual crossword convention: scanning row-major, a
//! cell gets the next number when it starts an across run (open, with a block
//! or the edge to its left and an open cell to its right) or a down run.

use data_encoding::BASE64URL_NOPAD;

use crate::models::{BLOCK, Clue, ClueKey, Direction, NewClue};

/// One numbered run of open cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub number: u32,
    pub direction: Direction,
    pub row: usize,
    pub col: usize,
    pub length: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout is empty")]
    Empty,
    #[error("layout row {row} has {found} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Validate a layout and return its (width, height).
pub fn dimensions(layout: &[String]) -> Result<(usize, usize), LayoutError> {
    let width = layout.first().map(|r| r.chars().count()).unwrap_or(0);
    if width == 0 {
        return Err(LayoutError::Empty);
    }
    for (row, line) in layout.iter().enumerate() {
        let found = line.chars().count();
        if found != width {
            return Err(LayoutError::Ragged {
                row,
                expected: width,
                found,
            });
        }
    }
    Ok((width, layout.len()))
}

/// Number every across and down run in `layout`.
pub fn number_grid(layout: &[String]) -> Result<Vec<Slot>, LayoutError> {
    let (width, height) = dimensions(layout)?;
    let grid: Vec<Vec<bool>> = layout
        .iter()
        .map(|r| r.chars().map(|c| c != BLOCK).collect())
        .collect();
    let open = |r: usize, c: usize| r < height && c < width && grid[r][c];

    let mut slots = Vec::new();
    let mut next = 1;
    for r in 0..height {
        for c in 0..width {
            if !open(r, c) {
                continue;
            }
            let starts_across = (c == 0 || !open(r, c - 1)) && open(r, c + 1);
            let starts_down = (r == 0 || !open(r - 1, c)) && open(r + 1, c);
            if !starts_across && !starts_down {
                continue;
            }
            if starts_across {
                let length = (c..width).take_while(|&cc| open(r, cc)).count();
                slots.push(Slot {
                    number: next,
                    direction: Direction::Across,
                    row: r,
                    col: c,
                    length,
                });
            }
            if starts_down {
                let length = (r..height).take_while(|&rr| open(rr, c)).count();
                slots.push(Slot {
                    number: next,
                    direction: Direction::Down,
                    row: r,
                    col: c,
                    length,
                });
            }
            next += 1;
        }
    }
    Ok(slots)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClueError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("no {0} slot in this grid")]
    UnknownSlot(ClueKey),
    #[error("clue {0} given twice")]
    Duplicate(ClueKey),
    #[error("answer for {key} has {found} letters, slot holds {expected}")]
    LengthMismatch {
        key: ClueKey,
        expected: usize,
        found: usize,
    },
}

/// Match submitted clues against the numbered grid and encode their answers.
///
/// Every clue must land on a slot and fill it exactly. Slots left without a
/// clue are allowed.
pub fn assemble_clues(layout: &[String], submitted: &[NewClue]) -> Result<Vec<Clue>, ClueError> {
    let slots = number_grid(layout)?;
    let mut clues: Vec<Clue> = Vec::with_capacity(submitted.len());

    for new in submitted {
        let key = ClueKey::new(new.number, new.direction);
        if clues.iter().any(|c| c.key() == key) {
            return Err(ClueError::Duplicate(key));
        }
        let slot = slots
            .iter()
            .find(|s| s.number == new.number && s.direction == new.direction)
            .ok_or(ClueError::UnknownSlot(key))?;
        let found = new.answer.trim().chars().count();
        if found != slot.length {
            return Err(ClueError::LengthMismatch {
                key,
                expected: slot.length,
                found,
            });
        }
        clues.push(Clue {
            number: slot.number,
            direction: slot.direction,
            row: slot.row,
            col: slot.col,
            length: slot.length,
            text: new.text.clone(),
            answer_encoded: encode_answer(&new.answer),
        });
    }

    clues.sort_by_key(|c| c.key());
    Ok(clues)
}

/// Obfuscate an answer for storage. Answers are upper-cased first.
pub fn encode_answer(answer: &str) -> String {
    BASE64URL_NOPAD.encode(answer.trim().to_uppercase().as_bytes())
}

/// Recover an answer stored with [`encode_answer`].
pub fn decode_answer(encoded: &str) -> anyhow::Result<String> {
    let bytes = BASE64URL_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| anyhow::anyhow!("corrupt stored answer: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(rows: &[&str]) -> Vec<String> {
        rows.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn numbers_a_small_grid() {
        // 1 2 3 #
        // 4 . . 5
        // # 6 . .
        let slots = number_grid(&layout(&["...#", "....", "#..."])).unwrap();
        let summary: Vec<_> = slots
            .iter()
            .map(|s| (s.number, s.direction, s.row, s.col, s.length))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, Direction::Across, 0, 0, 3),
                (1, Direction::Down, 0, 0, 2),
                (2, Direction::Down, 0, 1, 3),
                (3, Direction::Down, 0, 2, 3),
                (4, Direction::Across, 1, 0, 4),
                (5, Direction::Down, 1, 3, 2),
                (6, Direction::Across, 2, 1, 3),
            ]
        );
    }

    #[test]
    fn single_cells_are_not_runs() {
        let slots = number_grid(&layout(&[".#", "#."])).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn rejects_ragged_layouts() {
        assert_eq!(
            number_grid(&layout(&["...", ".."])),
            Err(LayoutError::Ragged {
                row: 1,
                expected: 3,
                found: 2
            })
        );
        assert_eq!(number_grid(&[]), Err(LayoutError::Empty));
    }

    fn new_clue(number: u32, direction: Direction, answer: &str) -> NewClue {
        NewClue {
            number,
            direction,
            text: format!("clue {number}"),
            answer: answer.into(),
        }
    }

    #[test]
    fn assembles_clues_onto_slots() {
        let grid = layout(&["...#", "....", "#..."]);
        let clues = assemble_clues(
            &grid,
            &[
                new_clue(4, Direction::Across, "oboe"),
                new_clue(1, Direction::Across, "cat"),
            ],
        )
        .unwrap();
        assert_eq!(clues.len(), 2);
        assert_eq!(clues[0].key(), ClueKey::new(1, Direction::Across));
        assert_eq!((clues[1].row, clues[1].col, clues[1].length), (1, 0, 4));
        assert_eq!(decode_answer(&clues[1].answer_encoded).unwrap(), "OBOE");
    }

    #[test]
    fn rejects_clues_that_do_not_fit() {
        let grid = layout(&["...#", "....", "#..."]);
        assert_eq!(
            assemble_clues(&grid, &[new_clue(4, Direction::Across, "oboes")]).unwrap_err(),
            ClueError::LengthMismatch {
                key: ClueKey::new(4, Direction::Across),
                expected: 4,
                found: 5,
            }
        );
        assert_eq!(
            assemble_clues(&grid, &[new_clue(4, Direction::Down, "ab")]).unwrap_err(),
            ClueError::UnknownSlot(ClueKey::new(4, Direction::Down))
        );
        assert!(matches!(
            assemble_clues(
                &grid,
                &[
                    new_clue(1, Direction::Across, "cat"),
                    new_clue(1, Direction::Across, "dog")
                ]
            ),
            Err(ClueError::Duplicate(_))
        ));
    }

    #[test]
    fn answers_survive_storage() {
        let stored = encode_answer(" oboe ");
        assert_ne!(stored, "OBOE");
        assert_eq!(decode_answer(&stored).unwrap(), "OBOE");
        assert!(decode_answer("!!").is_err());
    }
}
