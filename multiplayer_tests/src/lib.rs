// Test-only game client for multiplayer integration tests.
//
// Wraps a real `GameSession<TcpConnector>` (from `broadside_session`) to
// provide a synchronous, test-friendly API for exercising the full pipeline:
// host creates -> relay -> guests join -> place -> ready -> battle -> result.
//
// The only test-specific code here is the blocking polling wrappers (loops
// around `GameSession::pump()` with a timeout) and the event recorder. All
// networking and room logic uses the same code paths as a real client.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use broadside_game::{Room, RoomEvent, ShipId};
use broadside_protocol::{ClientId, GameCode, GamePhase};
use broadside_relay::{TcpConnector, TransportState};
use broadside_session::{GameSession, SessionConfig, SessionLink};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Rows used by `place_standard_fleet`; every odd row stays empty.
pub const FLEET_ROWS: [usize; 5] = [0, 2, 4, 6, 8];

/// A test player wrapping a real GameSession over TCP.
pub struct TestPlayer {
    session: GameSession<TcpConnector>,
    events: Arc<Mutex<Vec<RoomEvent>>>,
}

impl TestPlayer {
    /// Create the room `code` on the relay and wait for the relay's ack.
    pub fn host(addr: SocketAddr, code: &GameCode, name: &str) -> Self {
        Self::connect(addr, code, name, true)
    }

    /// Join the room `code` and wait for the relay's ack.
    pub fn join(addr: SocketAddr, code: &GameCode, name: &str) -> Self {
        Self::connect(addr, code, name, false)
    }

    /// Start a session without waiting for the handshake.
    pub fn start(addr: SocketAddr, code: &GameCode, name: &str, is_host: bool) -> Self {
        let mut session = broadside_session::connect_tcp(
            addr.to_string(),
            SessionConfig::default(),
            code.clone(),
            ClientId::new(name),
            is_host,
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        session.start(Instant::now());
        Self { session, events }
    }

    fn connect(addr: SocketAddr, code: &GameCode, name: &str, is_host: bool) -> Self {
        let mut player = Self::start(addr, code, name, is_host);
        player.pump_until("relay handshake", |p| {
            p.session.transport_state() == TransportState::Connected
        });
        player
    }

    pub fn id(&self) -> ClientId {
        self.session.local_id().clone()
    }

    pub fn room(&self) -> &Room<SessionLink<TcpConnector>> {
        self.session.room()
    }

    pub fn session_mut(&mut self) -> &mut GameSession<TcpConnector> {
        &mut self.session
    }

    pub fn phase(&self) -> GamePhase {
        self.room().phase()
    }

    pub fn transport_state(&self) -> TransportState {
        self.session.transport_state()
    }

    /// Every room event seen so far.
    pub fn events(&self) -> Vec<RoomEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn saw(&self, event: &RoomEvent) -> bool {
        self.events.lock().unwrap().contains(event)
    }

    /// Non-blocking: run one pump iteration.
    pub fn pump(&mut self) {
        self.session.pump(Instant::now());
    }

    /// Blocking pump until `done` holds. Panics after `POLL_TIMEOUT`.
    pub fn pump_until(&mut self, what: &str, done: impl Fn(&Self) -> bool) {
        let start = Instant::now();
        loop {
            self.pump();
            if done(self) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Place all five ships horizontally at column 0 on `FLEET_ROWS`, carrier
    /// first.
    pub fn place_standard_fleet(&mut self) {
        let ships = [
            ShipId::Carrier,
            ShipId::Battleship,
            ShipId::Cruiser,
            ShipId::Submarine,
            ShipId::Destroyer,
        ];
        for (ship, row) in ships.into_iter().zip(FLEET_ROWS) {
            assert!(
                self.session.place_ship(ship, row, 0, true),
                "placing {ship} failed"
            );
        }
    }

    pub fn mark_ready(&mut self) {
        assert!(self.session.mark_ready(true), "mark_ready failed");
    }

    pub fn attack(&mut self, target: &ClientId, row: usize, col: usize) -> bool {
        self.session.attack_client(target, row, col)
    }

    /// Leave the room and say goodbye to the relay.
    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }
}

/// Pump every player until `done` holds for the group. Panics after
/// `POLL_TIMEOUT`.
pub fn pump_all_until(players: &mut [TestPlayer], what: &str, done: impl Fn(&[TestPlayer]) -> bool) {
    let start = Instant::now();
    loop {
        for player in players.iter_mut() {
            player.pump();
        }
        if done(players) {
            return;
        }
        assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Every ship cell of `place_standard_fleet`, carrier first.
pub fn standard_fleet_cells() -> Vec<(usize, usize)> {
    let sizes = [5, 4, 3, 3, 2];
    FLEET_ROWS
        .into_iter()
        .zip(sizes)
        .flat_map(|(row, size)| (0..size).map(move |col| (row, col)))
        .collect()
}

/// Cells guaranteed empty under `place_standard_fleet`.
pub fn standard_empty_cells() -> Vec<(usize, usize)> {
    [1, 3, 5, 7, 9]
        .into_iter()
        .flat_map(|row| (0..10).map(move |col| (row, col)))
        .collect()
}
