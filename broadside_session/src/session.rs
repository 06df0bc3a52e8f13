// GameSession: one room and one transport session, pumped from one loop.
//
// The room and the transport are both passive state machines. This file is
// the single serialized queue that joins them: the owner calls `pump(now)`
// (and the command methods) from one thread, and every input, whether a relay
// message, a heartbeat or backoff timer, or a ready rebroadcast, is applied
// to the room in arrival order. Nothing here spawns threads or sleeps.
//
// Bridging, per transport event:
// - `Established`      -> `Room::announce` (re-announce after every reconnect)
// - `Payload`          -> `Room::handle_payload`
// - `PeerLeft`         -> `Room::peer_left`
// - `PeerDisconnected` -> `Room::client_disconnected`
// - `Disconnected`     -> `Room::connection_lost`
// The transport events are also returned from `pump` so a presentation
// layer can show reconnect progress.
//
// Ready resend: while the local participant is ready and the battle has not
// started, `client_ready` is rebroadcast every `ready_resend_interval_ms`, at
// most `ready_resend_limit` times per ready transition or reconnection.
//
// See also: `broadside_game::room` for the room rules,
// `broadside_relay::transport` for the connection lifecycle, and
// `multiplayer_tests` for sessions driven over a live relay.
//
// **Critical constraint:** the room only ever sees the transport through
// `SessionLink`, so every outbound room message goes through
// `TransportSession::send`, which refuses (returns false) unless connected.

use std::time::Instant;

use broadside_game::{
    ListenerId, Orientation, Room, RoomEvent, RoomLink, RoomSnapshot, ShipId,
};
use broadside_protocol::{ClientId, GameCode, GamePhase, RoomMessage};
use broadside_relay::{Connector, TransportEvent, TransportSession, TransportState};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;

/// `RoomLink` over a transport session: room messages become `GameData`
/// payloads.
pub struct SessionLink<C: Connector> {
    transport: TransportSession<C>,
}

impl<C: Connector> SessionLink<C> {
    pub fn transport(&self) -> &TransportSession<C> {
        &self.transport
    }
}

impl<C: Connector> RoomLink for SessionLink<C> {
    fn send(&mut self, message: &RoomMessage) -> bool {
        match message.to_payload() {
            Ok(payload) => self.transport.send(payload),
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "room message not encodable");
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ReadyResend {
    next_at: Instant,
    sent: u32,
}

pub struct GameSession<C: Connector> {
    room: Room<SessionLink<C>>,
    config: SessionConfig,
    ready_resend: Option<ReadyResend>,
    shut_down: bool,
}

impl<C: Connector> GameSession<C> {
    /// Build a session for `game_code`. The host creates the relay room,
    /// everyone else joins it. Nothing touches the network until `start`.
    pub fn new(
        connector: C,
        config: SessionConfig,
        game_code: GameCode,
        local_id: ClientId,
        is_host: bool,
    ) -> Self {
        let transport = TransportSession::new(
            connector,
            config.transport.clone(),
            game_code.clone(),
            local_id.as_str(),
            is_host,
        );
        let room = Room::new(SessionLink { transport }, game_code, is_host, local_id);
        Self {
            room,
            config,
            ready_resend: None,
            shut_down: false,
        }
    }

    /// Open the first connection. Returns false if already started.
    pub fn start(&mut self, now: Instant) -> bool {
        self.transport_mut().connect(now)
    }

    /// Run one turn of the loop: drain the transport, apply what arrived to
    /// the room, then run the ready-resend timer.
    pub fn pump(&mut self, now: Instant) -> Vec<TransportEvent> {
        if self.shut_down {
            return Vec::new();
        }
        let events = self.transport_mut().poll(now);
        for event in &events {
            self.apply(event);
        }
        self.tick_ready_resend(now);
        events
    }

    fn apply(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::Established { reconnected } => {
                if *reconnected {
                    info!(game_code = %self.room.game_code(), "reconnected; re-announcing");
                }
                self.ready_resend = None;
                self.room.announce();
            }
            TransportEvent::Payload(payload) => self.room.handle_payload(payload),
            TransportEvent::RoomReady { members } => {
                debug!(members = members.len(), "relay room ready");
            }
            TransportEvent::PeerLeft { member_id } => {
                self.room.peer_left(&ClientId::new(member_id.as_str()));
            }
            TransportEvent::PeerDisconnected { member_id } => {
                self.room.client_disconnected(&ClientId::new(member_id.as_str()));
            }
            TransportEvent::Reconnecting { attempt, delay_ms } => {
                debug!(attempt, delay_ms, "transport reconnecting");
            }
            TransportEvent::Rejected { reason } => {
                warn!(%reason, "relay rejected session");
            }
            TransportEvent::Disconnected => self.room.connection_lost(),
        }
    }

    fn tick_ready_resend(&mut self, now: Instant) {
        let waiting = !self.room.is_closed()
            && matches!(self.room.phase(), GamePhase::Setup | GamePhase::Placement)
            && self.room.local().is_some_and(|p| p.ready);
        if !waiting {
            self.ready_resend = None;
            return;
        }
        let interval = self.config.ready_resend_interval();
        let resend = self.ready_resend.get_or_insert(ReadyResend {
            next_at: now + interval,
            sent: 0,
        });
        if resend.sent >= self.config.ready_resend_limit || now < resend.next_at {
            return;
        }
        resend.sent += 1;
        resend.next_at = now + interval;
        let attempt = resend.sent;
        if self.room.resend_ready() {
            debug!(attempt, "ready rebroadcast");
        }
    }

    /// The earliest instant at which `pump` has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let resend = self
            .ready_resend
            .filter(|r| r.sent < self.config.ready_resend_limit)
            .map(|r| r.next_at);
        [self.transport().next_deadline(), resend]
            .into_iter()
            .flatten()
            .min()
    }

    // -----------------------------------------------------------------------
    // Commands (forwarded to the room)
    // -----------------------------------------------------------------------

    pub fn place_ship(&mut self, ship_id: ShipId, row: usize, col: usize, horizontal: bool) -> bool {
        let orientation = if horizontal {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        };
        self.room.place_ship(ship_id, row, col, orientation)
    }

    pub fn clear_ships(&mut self) -> bool {
        self.room.clear_ships()
    }

    /// Set the local ready flag. A new ready transition restarts the resend
    /// budget.
    pub fn mark_ready(&mut self, ready: bool) -> bool {
        let accepted = self.room.mark_ready(ready);
        if accepted {
            self.ready_resend = None;
        }
        accepted
    }

    pub fn attack_client(&mut self, target_id: &ClientId, row: usize, col: usize) -> bool {
        self.room.attack_client(target_id, row, col)
    }

    pub fn start_battle(&mut self) -> bool {
        self.room.start_battle()
    }

    pub fn advance_turn(&mut self) -> bool {
        self.room.advance_turn()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&RoomEvent) + Send + 'static,
    {
        self.room.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.room.unsubscribe(id)
    }

    /// Leave the room, say goodbye to the relay, and detach every listener.
    /// Idempotent; `pump` does nothing afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.room.leave();
        self.transport_mut().disconnect();
        self.room.clear_listeners();
        self.ready_resend = None;
        info!(game_code = %self.room.game_code(), "session shut down");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn room(&self) -> &Room<SessionLink<C>> {
        &self.room
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.room.snapshot()
    }

    pub fn local_id(&self) -> &ClientId {
        self.room.local_id()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport().state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn transport(&self) -> &TransportSession<C> {
        &self.room.link().transport
    }

    fn transport_mut(&mut self) -> &mut TransportSession<C> {
        &mut self.room.link_mut().transport
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use broadside_protocol::{ClientMessage, ServerMessage};
    use broadside_relay::{Link, LinkError, LinkEvent, TransportConfig};
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Wire {
        sent: Vec<ClientMessage>,
        inbound: VecDeque<LinkEvent>,
        opens: usize,
        refuse: bool,
    }

    struct WireLink(Rc<RefCell<Wire>>);

    impl Link for WireLink {
        fn send(&mut self, message: &ClientMessage) -> Result<(), LinkError> {
            self.0.borrow_mut().sent.push(message.clone());
            Ok(())
        }

        fn poll(&mut self) -> Vec<LinkEvent> {
            self.0.borrow_mut().inbound.drain(..).collect()
        }

        fn close(&mut self) {}
    }

    #[derive(Clone, Default)]
    struct WireConnector(Rc<RefCell<Wire>>);

    impl Connector for WireConnector {
        type Link = WireLink;

        fn open(&mut self) -> Result<WireLink, LinkError> {
            let mut wire = self.0.borrow_mut();
            wire.opens += 1;
            if wire.refuse {
                return Err(LinkError::Closed);
            }
            Ok(WireLink(Rc::clone(&self.0)))
        }
    }

    impl WireConnector {
        fn push(&self, message: ServerMessage) {
            self.0.borrow_mut().inbound.push_back(LinkEvent::Message(message));
        }

        fn push_payload(&self, payload: serde_json::Value) {
            self.push(ServerMessage::GameData { payload });
        }

        fn hang_up(&self) {
            self.0.borrow_mut().inbound.push_back(LinkEvent::Closed);
        }

        /// Room payloads sent so far, by `type`.
        fn sent_kinds(&self) -> Vec<String> {
            self.0
                .borrow()
                .sent
                .iter()
                .filter_map(|m| match m {
                    ClientMessage::GameData { payload } => {
                        payload["type"].as_str().map(str::to_owned)
                    }
                    _ => None,
                })
                .collect()
        }

        fn clear_sent(&self) {
            self.0.borrow_mut().sent.clear();
        }
    }

    fn code() -> GameCode {
        "SESS01".parse().unwrap()
    }

    fn recorder(session: &mut GameSession<WireConnector>) -> Arc<Mutex<Vec<RoomEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        events
    }

    /// A session whose handshake has completed at `t0`.
    fn connected(
        is_host: bool,
        config: SessionConfig,
        t0: Instant,
    ) -> (GameSession<WireConnector>, WireConnector) {
        let connector = WireConnector::default();
        let local = if is_host { "host" } else { "guest" };
        let mut session =
            GameSession::new(connector.clone(), config, code(), ClientId::new(local), is_host);
        assert!(session.start(t0));
        connector.push(if is_host {
            ServerMessage::GameCreated { game_code: code() }
        } else {
            ServerMessage::GameJoined { game_code: code() }
        });
        let events = session.pump(t0);
        assert_eq!(events, vec![TransportEvent::Established { reconnected: false }]);
        (session, connector)
    }

    fn place_fleet(session: &mut GameSession<WireConnector>) {
        for (row, ship) in [
            ShipId::Carrier,
            ShipId::Battleship,
            ShipId::Cruiser,
            ShipId::Submarine,
            ShipId::Destroyer,
        ]
        .into_iter()
        .enumerate()
        {
            assert!(session.place_ship(ship, row * 2, 0, true));
        }
    }

    #[test]
    fn established_announces_the_local_client() {
        let (session, connector) = connected(true, SessionConfig::default(), Instant::now());
        let kinds = connector.sent_kinds();
        assert_eq!(kinds.first().map(String::as_str), Some("client_info"));
        assert!(kinds.iter().any(|k| k == "game_state_change"));
        assert_eq!(session.transport_state(), TransportState::Connected);
    }

    #[test]
    fn commands_before_connection_are_refused() {
        let connector = WireConnector::default();
        let mut session = GameSession::new(
            connector,
            SessionConfig::default(),
            code(),
            ClientId::new("guest"),
            false,
        );
        place_fleet(&mut session);
        // Placement is local; the ready broadcast needs the transport.
        assert!(!session.mark_ready(true));
        assert!(!session.room().local().unwrap().ready);
    }

    #[test]
    fn payloads_reach_the_room() {
        let t0 = Instant::now();
        let (mut session, connector) = connected(false, SessionConfig::default(), t0);
        connector.clear_sent();
        connector.push_payload(json!({"type": "client_info", "clientId": "host", "isHost": true}));
        session.pump(t0);

        assert_eq!(session.room().client_count(), 2);
        // Discovery reply to a peer we had not seen.
        assert_eq!(connector.sent_kinds(), vec!["client_info".to_string()]);
    }

    #[test]
    fn unknown_payload_surfaces_unhandled() {
        let t0 = Instant::now();
        let (mut session, connector) = connected(false, SessionConfig::default(), t0);
        let events = recorder(&mut session);
        let chat = json!({"type": "chat", "text": "hi"});
        connector.push_payload(chat.clone());
        session.pump(t0);
        assert_eq!(*events.lock().unwrap(), vec![RoomEvent::Unhandled(chat)]);
    }

    #[test]
    fn relay_departure_notices_reach_the_room() {
        let t0 = Instant::now();
        let (mut session, connector) = connected(true, SessionConfig::default(), t0);
        connector.push_payload(json!({"type": "client_info", "clientId": "guest", "isHost": false}));
        session.pump(t0);
        let events = recorder(&mut session);

        connector.push(ServerMessage::PeerDisconnected {
            member_id: "guest".into(),
        });
        session.pump(t0);
        assert_eq!(session.room().client_count(), 2);

        connector.push(ServerMessage::PeerLeft {
            member_id: "guest".into(),
        });
        session.pump(t0);
        assert_eq!(session.room().client_count(), 1);

        let events = events.lock().unwrap();
        assert!(events.contains(&RoomEvent::ClientDisconnected {
            client_id: ClientId::new("guest")
        }));
        assert!(events.contains(&RoomEvent::ClientLeft {
            client_id: ClientId::new("guest")
        }));
    }

    #[test]
    fn giving_up_reports_connection_lost_once() {
        let t0 = Instant::now();
        let config = SessionConfig {
            transport: TransportConfig {
                max_reconnect_attempts: 1,
                ..TransportConfig::default()
            },
            ..SessionConfig::default()
        };
        let (mut session, connector) = connected(false, config, t0);
        let events = recorder(&mut session);
        connector.0.borrow_mut().refuse = true;
        connector.hang_up();

        let mut now = t0;
        for _ in 0..20 {
            now += Duration::from_millis(500);
            session.pump(now);
        }

        assert_eq!(*events.lock().unwrap(), vec![RoomEvent::ConnectionLost]);
        assert_eq!(session.room().phase(), GamePhase::Finished);
        assert_eq!(session.transport_state(), TransportState::Closed);
    }

    #[test]
    fn reconnection_re_announces() {
        let t0 = Instant::now();
        let (mut session, connector) = connected(false, SessionConfig::default(), t0);
        connector.hang_up();
        let events = session.pump(t0);
        assert!(matches!(events[..], [TransportEvent::Reconnecting { attempt: 1, .. }]));

        connector.clear_sent();
        let retry = t0 + Duration::from_millis(1_000);
        session.pump(retry);
        connector.push(ServerMessage::GameJoined { game_code: code() });
        let events = session.pump(retry);
        assert_eq!(events, vec![TransportEvent::Established { reconnected: true }]);
        assert!(connector.sent_kinds().contains(&"client_info".to_string()));
    }

    #[test]
    fn ready_is_rebroadcast_within_budget() {
        let t0 = Instant::now();
        let config = SessionConfig {
            ready_resend_interval_ms: 100,
            ready_resend_limit: 2,
            transport: TransportConfig {
                heartbeat_timeout_ms: 60_000,
                heartbeat_interval_ms: 60_000,
                ..TransportConfig::default()
            },
        };
        let (mut session, connector) = connected(false, config, t0);
        place_fleet(&mut session);
        assert!(session.mark_ready(true));
        connector.clear_sent();

        session.pump(t0); // schedules the first resend
        assert_eq!(session.next_deadline(), Some(t0 + Duration::from_millis(100)));
        for step in 1..=5 {
            session.pump(t0 + Duration::from_millis(100 * step));
        }
        let resent = connector
            .sent_kinds()
            .iter()
            .filter(|k| *k == "client_ready")
            .count();
        assert_eq!(resent, 2);
    }

    #[test]
    fn shutdown_leaves_and_says_goodbye() {
        let t0 = Instant::now();
        let (mut session, connector) = connected(false, SessionConfig::default(), t0);
        let events = recorder(&mut session);
        connector.clear_sent();

        session.shutdown();
        session.shutdown();

        assert_eq!(connector.sent_kinds(), vec!["client_left".to_string()]);
        assert_eq!(connector.0.borrow().sent.last(), Some(&ClientMessage::Goodbye));
        assert_eq!(session.transport_state(), TransportState::Closed);

        // Listeners are detached and the pump is inert.
        connector.push_payload(json!({"type": "chat"}));
        assert!(session.pump(t0).is_empty());
        assert!(events.lock().unwrap().is_empty());
    }
}
