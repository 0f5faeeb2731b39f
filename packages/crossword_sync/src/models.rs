use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel stored in a row for a cell nobody has filled.
pub const EMPTY_CELL: char = ' ';

/// One grid row of fill state, one character per column.
pub type Row = String;

// =============================================================================
// Clue identity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Across,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Across => "across",
            Direction::Down => "down",
        }
    }

    /// (row, col) delta when walking a clue's cell run.
    pub fn step(&self) -> (usize, usize) {
        match self {
            Direction::Across => (0, 1),
            Direction::Down => (1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "across" => Ok(Direction::Across),
            "down" => Ok(Direction::Down),
            other => Err(format!("invalid direction: {other}")),
        }
    }
}

/// A clue addressed by number and direction, serialized as `"<number>-<direction>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClueKey {
    pub number: u32,
    pub direction: Direction,
}

impl ClueKey {
    pub fn new(number: u32, direction: Direction) -> Self {
        Self { number, direction }
    }
}

impl fmt::Display for ClueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.direction)
    }
}

impl FromStr for ClueKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, direction) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid clue key: {s}"))?;
        let number = number
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid clue number in key: {s}"))?;
        Ok(Self {
            number,
            direction: direction.trim().parse()?,
        })
    }
}

impl Serialize for ClueKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClueKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Credit for the first contributor to claim a clue within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    pub user_id: Option<i64>,
    pub username: String,
    /// ISO-8601, millisecond precision, UTC.
    pub timestamp: String,
}

impl Attribution {
    pub fn now(user_id: Option<i64>, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub puzzle_id: i64,
    pub owner_user_id: Option<i64>,
    pub anonymous_id: Option<String>,
    pub state: Vec<Row>,
    pub attributions: BTreeMap<String, Attribution>,
    pub is_complete: bool,
}

/// A blank fill state for a `width` x `height` grid.
pub fn blank_state(width: usize, height: usize) -> Vec<Row> {
    (0..height)
        .map(|_| EMPTY_CELL.to_string().repeat(width))
        .collect()
}

/// Bring a stored state up to the grid's geometry.
///
/// Short rows are padded with the empty sentinel and missing rows appended.
/// Nothing is ever truncated.
pub fn normalize_state(mut state: Vec<Row>, width: usize, height: usize) -> Vec<Row> {
    for row in state.iter_mut() {
        let len = row.chars().count();
        if len < width {
            row.extend(std::iter::repeat_n(EMPTY_CELL, width - len));
        }
    }
    while state.len() < height {
        state.push(EMPTY_CELL.to_string().repeat(width));
    }
    state
}

/// Map a client-supplied cell value onto the single stored character.
pub fn normalize_cell_value(value: &str) -> char {
    value.chars().next().unwrap_or(EMPTY_CELL)
}

/// Write `value` at (`row`, `col`).
///
/// The state grows by at most one row or one column past its current extent.
/// Coordinates further out are refused and leave the state untouched.
pub fn set_cell(
    state: &mut Vec<Row>,
    width: usize,
    row: usize,
    col: usize,
    value: char,
) -> bool {
    let row_len = state.get(row).map_or(width, |r| r.chars().count());
    if row > state.len() || col > row_len {
        return false;
    }
    if row == state.len() {
        state.push(EMPTY_CELL.to_string().repeat(width));
    }
    let mut cells: Vec<char> = state[row].chars().collect();
    if col == cells.len() {
        cells.push(EMPTY_CELL);
    }
    cells[col] = value;
    state[row] = cells.into_iter().collect();
    true
}

/// Character stored at (`row`, `col`), or the empty sentinel when out of range.
pub fn cell_at(state: &[Row], row: usize, col: usize) -> char {
    state
        .get(row)
        .and_then(|r| r.chars().nth(col))
        .unwrap_or(EMPTY_CELL)
}

// =============================================================================
// Puzzles
// =============================================================================

/// Character marking a block (unfillable square) in a puzzle layout.
pub const BLOCK: char = '#';

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Puzzle {
    pub id: i64,
    pub title: String,
    pub width: usize,
    pub height: usize,
    pub layout: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clue {
    pub number: u32,
    pub direction: Direction,
    pub row: usize,
    pub col: usize,
    pub length: usize,
    pub text: String,
    #[serde(skip)]
    pub answer_encoded: String,
}

impl Clue {
    pub fn key(&self) -> ClueKey {
        ClueKey::new(self.number, self.direction)
    }

    /// Grid coordinates covered by this clue, anchor first.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let (dr, dc) = self.direction.step();
        (0..self.length).map(move |i| (self.row + dr * i, self.col + dc * i))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClue {
    pub number: u32,
    pub direction: Direction,
    pub text: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePuzzleRequest {
    pub title: String,
    pub layout: Vec<String>,
    pub clues: Vec<NewClue>,
}

// =============================================================================
// Explanation jobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What a job explains: a clue of a stored puzzle, or ad-hoc text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobSubject {
    Clue {
        puzzle_id: i64,
        clue_number: u32,
        direction: Direction,
    },
    AdHoc {
        clue_text: String,
        answer: String,
    },
}

impl JobSubject {
    pub fn clue_number(&self) -> Option<u32> {
        match self {
            JobSubject::Clue { clue_number, .. } => Some(*clue_number),
            JobSubject::AdHoc { .. } => None,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            JobSubject::Clue { direction, .. } => Some(*direction),
            JobSubject::AdHoc { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationJob {
    pub request_id: String,
    pub subject: JobSubject,
    pub status: JobStatus,
    pub result_payload: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationReport {
    pub id: i64,
    pub puzzle_id: i64,
    pub clue_number: u32,
    pub direction: Direction,
    pub session_id: Option<String>,
    pub reason: String,
    pub resolved: bool,
    pub created_at: i64,
}
