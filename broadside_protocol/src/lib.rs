// broadside_protocol: wire protocol for Broadside multiplayer sessions.
//
// This crate defines the message types, framing, and serialization used by
// transport sessions, the relay, and the room state machine. It is shared by
// every other crate in the workspace and depends on none of them.
//
// Module overview:
// - `types.rs`:    ID and phase types: `ClientId`, `GameCode`, `GamePhase`.
// - `message.rs`:  Relay envelope, `ClientMessage` / `ServerMessage`.
// - `room.rs`:     Room-level tagged payloads (`RoomMessage`) carried inside
//                  the envelope's `GameData`.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then JSON payload.
//
// Design decisions:
// - **Two layers.** The relay envelope is game-agnostic; room payloads are
//   opaque `serde_json::Value`s to the relay and the transport session.
// - **JSON everywhere.** Room payloads are flat, `type`-tagged objects so
//   that any peer implementation can read them without a schema.
// - **No async runtime.** Framing uses `std::io::Read`/`Write`.

pub mod framing;
pub mod message;
pub mod room;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, decode, encode, read_message, write_message};
pub use message::{ClientMessage, ServerMessage};
pub use room::{KNOWN_TYPES, RoomMessage};
pub use types::{ClientId, GAME_CODE_LEN, GameCode, GameCodeError, GamePhase};
