// broadside_relay: transport session and relay plumbing for Broadside.
//
// Two halves share this crate because they speak the same envelope
// (`broadside_protocol::message`):
//
// Client side:
// - `transport.rs`: `TransportSession<C: Connector>`, the connect / handshake /
//                   heartbeat / backoff state machine. Game-agnostic: it moves
//                   opaque JSON payloads and reports lifecycle events.
// - `client.rs`:    `TcpConnector` / `RelayLink`, the TCP implementation of
//                   the `Connector` / `Link` traits (reader thread + mpsc).
// - `config.rs`:    `TransportConfig` timing knobs.
//
// Server side:
// - `rooms.rs`:     `RoomDirectory`: rooms keyed by game code, admission,
//                   forwarding, departure notices. The core data structure
//                   that `server.rs` drives.
// - `server.rs`:    TCP listener, reader threads (one per member), and the
//                   main event loop. `std::net` with thread-per-reader and an
//                   `mpsc` channel funnelling events into the single-threaded
//                   directory.
//
// `error.rs` holds `LinkError` (client links) and `JoinError` (admission).
//
// The relay never looks inside room payloads. It can run as a standalone
// binary (`main.rs`) or be embedded in a process via `start_relay`, which is
// how the integration tests use it.

pub mod client;
pub mod config;
pub mod error;
pub mod rooms;
pub mod server;
pub mod transport;

pub use client::{RelayLink, TcpConnector};
pub use config::TransportConfig;
pub use error::{JoinError, LinkError};
pub use server::{RelayConfig, RelayHandle, start_relay};
pub use transport::{Connector, Link, LinkEvent, TransportEvent, TransportSession, TransportState};
