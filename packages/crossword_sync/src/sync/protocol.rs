//! Sync Protocol Types
//!
//! Events pushed to clients over both transports, and the control messages a
//! duplex socket may send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ClueKey, Direction, Row};

/// One logical event. Each transport frames it differently; see `registry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// First frame on every connection, carrying the id the registry assigned.
    ConnectionEstablished { client_id: String },
    /// Full-state snapshot.
    PuzzleUpdated { state: Vec<Row> },
    /// `sender_id` is always present (possibly null) so socket clients can
    /// drop their own echo.
    CellUpdated {
        r: usize,
        c: usize,
        value: String,
        sender_id: Option<String>,
    },
    WordClaimed {
        clue_key: ClueKey,
        user_id: Option<i64>,
        username: String,
        timestamp: String,
    },
    ExplanationReady {
        request_id: String,
        clue_number: Option<u32>,
        direction: Option<Direction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        success: bool,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ConnectionEstablished { .. } => "connection_established",
            SyncEvent::PuzzleUpdated { .. } => "puzzle_updated",
            SyncEvent::CellUpdated { .. } => "cell_updated",
            SyncEvent::WordClaimed { .. } => "word_claimed",
            SyncEvent::ExplanationReady { .. } => "explanation_ready",
        }
    }

    /// The event body without its `type` tag.
    pub fn data(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        Ok(value)
    }
}

/// Messages a duplex-socket client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Subscribe this connection to a session's topic, leaving any previous one.
    JoinSession { session_id: String },
    /// Edit a cell of the joined session.
    UpdateCell { r: usize, c: usize, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cell_update_always_carries_sender_id() {
        let ev = SyncEvent::CellUpdated {
            r: 2,
            c: 3,
            value: "A".into(),
            sender_id: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({"type": "cell_updated", "r": 2, "c": 3, "value": "A", "senderId": null})
        );
    }

    #[test]
    fn data_strips_type_tag() {
        let ev = SyncEvent::WordClaimed {
            clue_key: ClueKey::new(5, Direction::Across),
            user_id: Some(7),
            username: "Ada".into(),
            timestamp: "2024-01-01T00:00:00.000Z".into(),
        };
        assert_eq!(ev.event_type(), "word_claimed");
        assert_eq!(
            ev.data().unwrap(),
            json!({
                "clueKey": "5-across",
                "userId": 7,
                "username": "Ada",
                "timestamp": "2024-01-01T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn puzzle_updated_preserves_empty_cells() {
        let state = vec!["A  B".to_string(), "    ".to_string()];
        let wire = serde_json::to_string(&SyncEvent::PuzzleUpdated {
            state: state.clone(),
        })
        .unwrap();
        let back: SyncEvent = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, SyncEvent::PuzzleUpdated { state });
    }

    #[test]
    fn explanation_failure_omits_explanation() {
        let ev = SyncEvent::ExplanationReady {
            request_id: "r1".into(),
            clue_number: Some(4),
            direction: Some(Direction::Across),
            explanation: None,
            error: Some("timeout".into()),
            success: false,
        };
        let v = ev.data().unwrap();
        assert_eq!(v["requestId"], "r1");
        assert_eq!(v["direction"], "across");
        assert_eq!(v["error"], "timeout");
        assert!(v.get("explanation").is_none());
    }

    #[test]
    fn parses_client_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join_session","sessionId":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinSession {
                session_id: "abc".into()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"update_cell","r":1,"c":0,"value":""}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::UpdateCell {
                r: 1,
                c: 0,
                value: String::new()
            }
        );
    }
}
