// Room-level messages exchanged between participants through the relay.
//
// On the wire each message is a flat JSON object tagged by a snake_case
// `type` field, with camelCase fields, e.g. `{"type":"attack","fromClientId":...}`.
// These ride inside the relay's `GameData` envelope and are the only thing the
// room state machine reads or writes.
//
// Forward compatibility rules:
// - Unknown fields on a known type are ignored (serde's default).
// - Unknown `type` values decode to `RoomMessage::Unknown`; the room hands the
//   raw JSON to the presentation layer untouched.
// - A known `type` with missing or mistyped fields fails to decode. The room
//   drops it as a protocol violation.
//
// Field semantics for the attack pair: `fromClientId` is always the attacker
// and `toClientId` the defender, in both `attack` and `attack_result`.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, GamePhase};

/// Every `type` tag the room understands.
pub const KNOWN_TYPES: &[&str] = &[
    "client_info",
    "client_ready",
    "game_state_change",
    "attack",
    "attack_result",
    "game_over",
    "client_left",
    "ping",
    "pong",
];

/// A room message, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomMessage {
    /// A participant announces itself (on join and after every reconnection).
    #[serde(rename_all = "camelCase")]
    ClientInfo { client_id: ClientId, is_host: bool },
    /// A participant's readiness changed.
    #[serde(rename_all = "camelCase")]
    ClientReady { client_id: ClientId, ready: bool },
    /// Host-authored replica update of phase, ring, and turn.
    #[serde(rename_all = "camelCase")]
    GameStateChange {
        state: GamePhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_order: Option<Vec<ClientId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_turn_index: Option<usize>,
    },
    /// A shot at `to_client_id`'s board.
    #[serde(rename_all = "camelCase")]
    Attack {
        from_client_id: ClientId,
        to_client_id: ClientId,
        row: usize,
        col: usize,
    },
    /// The defender's verdict on an `Attack`.
    #[serde(rename_all = "camelCase")]
    AttackResult {
        from_client_id: ClientId,
        to_client_id: ClientId,
        row: usize,
        col: usize,
        hit: bool,
        #[serde(default)]
        ship_id: Option<String>,
        #[serde(default)]
        sunk_ship_id: Option<String>,
        /// The defender has no ships left afloat.
        #[serde(default)]
        eliminated: bool,
    },
    /// The game ended. `None` means nobody is left standing.
    #[serde(rename_all = "camelCase")]
    GameOver { winner_id: Option<ClientId> },
    /// A participant left the room for good.
    #[serde(rename_all = "camelCase")]
    ClientLeft { client_id: ClientId },
    Ping,
    Pong,
    /// Any `type` not listed in `KNOWN_TYPES`.
    #[serde(other)]
    Unknown,
}

impl RoomMessage {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            RoomMessage::ClientInfo { .. } => "client_info",
            RoomMessage::ClientReady { .. } => "client_ready",
            RoomMessage::GameStateChange { .. } => "game_state_change",
            RoomMessage::Attack { .. } => "attack",
            RoomMessage::AttackResult { .. } => "attack_result",
            RoomMessage::GameOver { .. } => "game_over",
            RoomMessage::ClientLeft { .. } => "client_left",
            RoomMessage::Ping => "ping",
            RoomMessage::Pong => "pong",
            RoomMessage::Unknown => "unknown",
        }
    }

    /// Serialize to the JSON object carried inside `GameData`.
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Decode a `GameData` payload. Payloads whose `type` is missing or not
    /// in `KNOWN_TYPES` decode to `Unknown`; known types with bad fields are
    /// an error.
    pub fn from_payload(payload: &serde_json::Value) -> serde_json::Result<Self> {
        let known = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|t| KNOWN_TYPES.contains(&t));
        if !known {
            return Ok(RoomMessage::Unknown);
        }
        serde_json::from_value(payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn attack_uses_camel_case_fields() {
        let msg = RoomMessage::Attack {
            from_client_id: ClientId::new("a"),
            to_client_id: ClientId::new("b"),
            row: 3,
            col: 4,
        };
        let value = msg.to_payload().unwrap();
        assert_eq!(
            value,
            json!({"type": "attack", "fromClientId": "a", "toClientId": "b", "row": 3, "col": 4})
        );
        assert_eq!(RoomMessage::from_payload(&value).unwrap(), msg);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let value = json!({
            "type": "client_ready",
            "clientId": "b",
            "ready": true,
            "gameCode": "ABC123",
            "timestamp": 1234
        });
        assert_eq!(
            RoomMessage::from_payload(&value).unwrap(),
            RoomMessage::ClientReady {
                client_id: ClientId::new("b"),
                ready: true
            }
        );
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let value = json!({"type": "chat", "text": "hi"});
        assert_eq!(
            RoomMessage::from_payload(&value).unwrap(),
            RoomMessage::Unknown
        );
        let untagged = json!({"text": "no type at all"});
        assert_eq!(
            RoomMessage::from_payload(&untagged).unwrap(),
            RoomMessage::Unknown
        );
    }

    #[test]
    fn malformed_known_type_is_an_error() {
        let value = json!({"type": "attack", "fromClientId": "a", "row": "three"});
        assert!(RoomMessage::from_payload(&value).is_err());
    }

    #[test]
    fn game_state_change_optional_fields() {
        let turn_only = json!({"type": "game_state_change", "state": "BATTLE", "currentTurnIndex": 1});
        assert_eq!(
            RoomMessage::from_payload(&turn_only).unwrap(),
            RoomMessage::GameStateChange {
                state: GamePhase::Battle,
                client_order: None,
                current_turn_index: Some(1),
            }
        );

        let msg = RoomMessage::GameStateChange {
            state: GamePhase::Placement,
            client_order: None,
            current_turn_index: None,
        };
        assert_eq!(
            msg.to_payload().unwrap(),
            json!({"type": "game_state_change", "state": "PLACEMENT"})
        );
    }

    #[test]
    fn attack_result_defaults() {
        let value = json!({
            "type": "attack_result",
            "fromClientId": "a",
            "toClientId": "b",
            "row": 0,
            "col": 9,
            "hit": false
        });
        match RoomMessage::from_payload(&value).unwrap() {
            RoomMessage::AttackResult {
                ship_id,
                sunk_ship_id,
                eliminated,
                ..
            } => {
                assert_eq!(ship_id, None);
                assert_eq!(sunk_ship_id, None);
                assert!(!eliminated);
            }
            other => panic!("expected AttackResult, got {other:?}"),
        }
    }

    #[test]
    fn ping_tolerates_extra_fields() {
        let value = json!({"type": "ping", "timestamp": 99});
        assert_eq!(RoomMessage::from_payload(&value).unwrap(), RoomMessage::Ping);
        assert_eq!(RoomMessage::Ping.kind(), "ping");
    }
}
