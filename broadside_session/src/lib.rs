// broadside_session: the event pump that runs a Broadside game client.
//
// Joins a `broadside_game::Room` to a `broadside_relay::TransportSession`
// behind one serialized `pump(now)` loop, so relay messages, heartbeat and
// backoff timers, ready rebroadcasts, and local commands never race.
//
// Module overview:
// - `session.rs`: `GameSession<C: Connector>` and `SessionLink`, the
//                 `RoomLink` that carries room messages as relay payloads.
// - `config.rs`:  `SessionConfig` (transport timing + ready resend budget),
//                 loadable from JSON.
//
// Production code uses `GameSession<TcpConnector>` (see `connect_tcp`);
// tests substitute an in-memory connector.

pub mod config;
pub mod session;

use broadside_protocol::{ClientId, GameCode};
use broadside_relay::TcpConnector;

pub use config::{ConfigError, SessionConfig};
pub use session::{GameSession, SessionLink};

/// Build a session that talks to the relay at `relay_addr` over TCP.
pub fn connect_tcp(
    relay_addr: impl Into<String>,
    config: SessionConfig,
    game_code: GameCode,
    local_id: ClientId,
    is_host: bool,
) -> GameSession<TcpConnector> {
    GameSession::new(TcpConnector::new(relay_addr), config, game_code, local_id, is_host)
}
