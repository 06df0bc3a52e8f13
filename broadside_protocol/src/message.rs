// Relay envelope messages for client-relay communication.
//
// Two enums define the relay vocabulary:
// - `ClientMessage`: sent by a transport session to the relay.
// - `ServerMessage`: sent by the relay to a transport session.
//
// Room traffic rides inside `GameData` as an opaque JSON value; the relay
// never inspects it, and the transport session only hands it up to the room.
// The room-level vocabulary lives in `room.rs`.
//
// `member_id` in the handshake is the participant's client id. The relay
// treats it as an opaque tag so it can tell the rest of the room who left
// without knowing anything about the game.

use serde::{Deserialize, Serialize};

use crate::types::GameCode;

/// Messages sent by a client to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Open (or re-attach to) a room as its creator.
    CreateGame {
        game_code: GameCode,
        member_id: String,
    },
    /// Join an existing room.
    JoinGame {
        game_code: GameCode,
        member_id: String,
    },
    /// Opaque room payload to forward to every other member.
    GameData { payload: serde_json::Value },
    /// Liveness probe; the relay answers with `HeartbeatAck`.
    Heartbeat,
    /// Member is leaving gracefully.
    Goodbye,
}

/// Messages sent by the relay to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Create handshake accepted.
    GameCreated { game_code: GameCode },
    /// Join handshake accepted.
    GameJoined { game_code: GameCode },
    /// The room has two or more members.
    GameReady {
        game_code: GameCode,
        members: Vec<String>,
    },
    /// Room payload forwarded from another member.
    GameData { payload: serde_json::Value },
    /// Answer to `Heartbeat`.
    HeartbeatAck,
    /// Another member said goodbye.
    PeerLeft { member_id: String },
    /// Another member's connection dropped without a goodbye.
    PeerDisconnected { member_id: String },
    /// Handshake rejected or request invalid.
    Error { reason: String },
}
