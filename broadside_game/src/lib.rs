// broadside_game: board rules and the room state machine.
//
// This crate knows nothing about sockets, threads, or clocks. The room sends
// through a `RoomLink` and is fed decoded payloads by its owner, which makes
// every protocol path testable with an in-memory link (see the tests in
// `room.rs`).
//
// Module overview:
// - `ship.rs`:        The five-ship fleet catalog and `ShipId`.
// - `board.rs`:       10x10 grid, placement validity (no touching, diagonals
//                     included), attack resolution, sunk detection.
// - `participant.rs`: Per-client record: board, readiness, sunk list, logs.
// - `event.rs`:       `RoomEvent` notifications and the ordered listener list.
// - `room.rs`:        `Room<L: RoomLink>`: registry, turn ring, readiness gate,
//                     attack protocol, termination.
//
// The host-authority rules the room enforces are described at the top of
// `room.rs`.

pub mod board;
pub mod event;
pub mod participant;
pub mod room;
pub mod ship;

pub use board::{AttackOutcome, BOARD_SIZE, Board, BoardError, Cell, CellState, Orientation};
pub use event::{ListenerId, Listeners, RoomEvent};
pub use participant::{AttackRecord, Participant};
pub use room::{Room, RoomLink, RoomSnapshot};
pub use ship::{FLEET, Ship, ShipId, UnknownShip};
