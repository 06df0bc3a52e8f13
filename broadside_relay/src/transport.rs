// Transport session: the connection lifecycle beneath a room.
//
// Owns at most one physical link to the relay at a time and drives it through
//
//   Disconnected -> Connecting -> Connected <-> Reconnecting -> Closed
//
// `connect` opens a link and sends the create/join handshake (`CreateGame`
// for the host, `JoinGame` for a guest). The session is `Connected` once the
// relay acknowledges with `GameCreated`/`GameJoined`. From then on it sends a
// `Heartbeat` every interval; if nothing at all arrives from the relay within
// the heartbeat timeout, or a send fails, or the link reports closed, the link
// is dropped and the session retries with exponential backoff. Every
// successful reconnection re-runs the handshake and emits `Established`
// again; session state on the relay is not resumed. Once the retry budget is
// spent the session moves to `Closed` and emits `Disconnected`, exactly once.
//
// The session is a plain state machine with no threads or timers of its own.
// Its owner calls `poll(now)` from a single loop; `poll` drains the link,
// fires any timer whose deadline has passed, and returns what happened as a
// `Vec<TransportEvent>`. `next_deadline` tells the owner how long it may
// sleep. This keeps heartbeat and backoff timers in the same serialized
// stream as inbound messages, and lets tests drive time with synthetic
// `Instant`s.
//
// The physical side is abstracted by `Connector` / `Link`. `client.rs` has the
// TCP implementation; the tests below use a scripted one.
//
// See also: `config.rs` for the timing knobs, the `broadside_session` crate
// for the pump that feeds these events into a room.

use std::time::Instant;

use broadside_protocol::{ClientMessage, GameCode, ServerMessage};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::LinkError;

/// Something observed on a link since the last poll.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Message(ServerMessage),
    /// The link is gone (EOF, read error, or undecodable frame).
    Closed,
}

/// One physical connection to the relay.
pub trait Link {
    fn send(&mut self, message: &ClientMessage) -> Result<(), LinkError>;

    /// Drain everything received since the last call. Never blocks.
    fn poll(&mut self) -> Vec<LinkEvent>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Opens links. Called once per connection attempt.
pub trait Connector {
    type Link: Link;

    fn open(&mut self) -> Result<Self::Link, LinkError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// What `poll` reports to the owner.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The relay acknowledged our handshake. Fires again after every
    /// successful reconnection.
    Established { reconnected: bool },
    /// A room payload from another member.
    Payload(serde_json::Value),
    /// The relay reports two or more members in the game.
    RoomReady { members: Vec<String> },
    /// A member said goodbye.
    PeerLeft { member_id: String },
    /// A member's link dropped without a goodbye.
    PeerDisconnected { member_id: String },
    /// The link dropped; a reconnect attempt is scheduled after `delay_ms`.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// The relay refused a request.
    Rejected { reason: String },
    /// Terminal: reconnection gave up or the handshake was refused.
    Disconnected,
}

pub struct TransportSession<C: Connector> {
    connector: C,
    config: TransportConfig,
    game_code: GameCode,
    member_id: String,
    is_host: bool,
    state: TransportState,
    link: Option<C::Link>,
    reconnect_attempts: u32,
    ever_established: bool,
    handshake_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    next_heartbeat: Option<Instant>,
    last_inbound: Option<Instant>,
    send_failed: bool,
    disconnect_reported: bool,
}

impl<C: Connector> TransportSession<C> {
    pub fn new(
        connector: C,
        config: TransportConfig,
        game_code: GameCode,
        member_id: impl Into<String>,
        is_host: bool,
    ) -> Self {
        Self {
            connector,
            config,
            game_code,
            member_id: member_id.into(),
            is_host,
            state: TransportState::Disconnected,
            link: None,
            reconnect_attempts: 0,
            ever_established: false,
            handshake_deadline: None,
            retry_at: None,
            next_heartbeat: None,
            last_inbound: None,
            send_failed: false,
            disconnect_reported: false,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    pub fn game_code(&self) -> &GameCode {
        &self.game_code
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Begin the first connection attempt. Returns false unless the session
    /// is still `Disconnected`. A failed attempt is retried from `poll`.
    pub fn connect(&mut self, now: Instant) -> bool {
        if self.state != TransportState::Disconnected {
            return false;
        }
        self.state = TransportState::Connecting;
        self.attempt(now);
        true
    }

    /// Send a room payload. Returns false, without queueing, unless the
    /// session is `Connected`. A failed write schedules a reconnection on the
    /// next `poll`.
    pub fn send(&mut self, payload: serde_json::Value) -> bool {
        if self.state != TransportState::Connected || self.send_failed {
            return false;
        }
        self.send_raw(&ClientMessage::GameData { payload })
    }

    /// Say goodbye and close for good. No `Disconnected` event is emitted.
    pub fn disconnect(&mut self) {
        if self.state == TransportState::Closed {
            return;
        }
        if let Some(link) = self.link.as_mut() {
            if self.state == TransportState::Connected {
                if let Err(e) = link.send(&ClientMessage::Goodbye) {
                    debug!(error = %e, "goodbye not delivered");
                }
            }
        }
        self.drop_link();
        self.state = TransportState::Closed;
        self.disconnect_reported = true;
        self.retry_at = None;
        info!(game_code = %self.game_code, "transport closed");
    }

    /// The earliest instant at which `poll` has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let heartbeat_timeout = match (self.state, self.last_inbound) {
            (TransportState::Connected, Some(last)) => Some(last + self.config.heartbeat_timeout()),
            _ => None,
        };
        [
            self.handshake_deadline,
            self.retry_at,
            self.next_heartbeat,
            heartbeat_timeout,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Drain the link and run due timers. Call from the owner's loop.
    pub fn poll(&mut self, now: Instant) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.state == TransportState::Closed {
            return events;
        }

        let incoming = self.link.as_mut().map(Link::poll).unwrap_or_default();
        let mut lost = false;
        for event in incoming {
            match event {
                LinkEvent::Message(message) => self.on_message(message, now, &mut events),
                LinkEvent::Closed => {
                    lost = true;
                    break;
                }
            }
            if self.state == TransportState::Closed {
                return events;
            }
        }

        if lost {
            self.fail(now, "link closed", &mut events);
        } else if self.send_failed {
            self.fail(now, "send failed", &mut events);
        } else if self.handshake_deadline.is_some_and(|d| now >= d) {
            self.fail(now, "handshake timed out", &mut events);
        } else if self.state == TransportState::Connected {
            self.tick_heartbeat(now, &mut events);
        }

        if self.state == TransportState::Reconnecting
            && self.link.is_none()
            && self.retry_at.is_some_and(|t| now >= t)
        {
            self.retry_at = None;
            self.attempt(now);
            // A refused open surfaces on the next poll.
        }
        events
    }

    fn tick_heartbeat(&mut self, now: Instant, events: &mut Vec<TransportEvent>) {
        let silent_for = self.last_inbound.map(|last| now.saturating_duration_since(last));
        if silent_for.is_some_and(|d| d >= self.config.heartbeat_timeout()) {
            self.fail(now, "heartbeat timed out", events);
            return;
        }
        if self.next_heartbeat.is_some_and(|t| now >= t) {
            if self.send_raw(&ClientMessage::Heartbeat) {
                self.next_heartbeat = Some(now + self.config.heartbeat_interval());
            } else {
                self.fail(now, "heartbeat send failed", events);
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage, now: Instant, events: &mut Vec<TransportEvent>) {
        self.last_inbound = Some(now);
        match message {
            ServerMessage::GameCreated { .. } | ServerMessage::GameJoined { .. } => {
                if self.handshake_deadline.is_none() {
                    debug!("duplicate handshake ack");
                    return;
                }
                let reconnected = self.ever_established;
                self.handshake_deadline = None;
                self.reconnect_attempts = 0;
                self.ever_established = true;
                self.state = TransportState::Connected;
                self.next_heartbeat = Some(now + self.config.heartbeat_interval());
                info!(game_code = %self.game_code, reconnected, "transport established");
                events.push(TransportEvent::Established { reconnected });
            }
            ServerMessage::GameReady { members, .. } => {
                events.push(TransportEvent::RoomReady { members });
            }
            ServerMessage::GameData { payload } => events.push(TransportEvent::Payload(payload)),
            ServerMessage::HeartbeatAck => {}
            ServerMessage::PeerLeft { member_id } => {
                events.push(TransportEvent::PeerLeft { member_id });
            }
            ServerMessage::PeerDisconnected { member_id } => {
                events.push(TransportEvent::PeerDisconnected { member_id });
            }
            ServerMessage::Error { reason } => {
                warn!(game_code = %self.game_code, %reason, "relay error");
                events.push(TransportEvent::Rejected { reason });
                if self.handshake_deadline.is_some() {
                    // Retrying a refused create/join cannot succeed.
                    self.close_fatally(events);
                }
            }
        }
    }

    fn handshake_message(&self) -> ClientMessage {
        if self.is_host {
            ClientMessage::CreateGame {
                game_code: self.game_code.clone(),
                member_id: self.member_id.clone(),
            }
        } else {
            ClientMessage::JoinGame {
                game_code: self.game_code.clone(),
                member_id: self.member_id.clone(),
            }
        }
    }

    /// Open a link and send the handshake.
    fn attempt(&mut self, now: Instant) {
        let mut link = match self.connector.open() {
            Ok(link) => link,
            Err(e) => {
                debug!(error = %e, "open failed");
                // Surfaced through the next poll so the events reach the owner.
                self.send_failed = true;
                self.handshake_deadline = Some(now);
                return;
            }
        };
        let handshake = self.handshake_message();
        if let Err(e) = link.send(&handshake) {
            debug!(error = %e, "handshake send failed");
            link.close();
            self.send_failed = true;
            self.handshake_deadline = Some(now);
            return;
        }
        self.link = Some(link);
        self.send_failed = false;
        self.last_inbound = None;
        self.handshake_deadline = Some(now + self.config.handshake_timeout());
    }

    fn send_raw(&mut self, message: &ClientMessage) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "send failed");
                self.send_failed = true;
                false
            }
        }
    }

    fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.handshake_deadline = None;
        self.next_heartbeat = None;
        self.last_inbound = None;
        self.send_failed = false;
    }

    /// Drop the current link and schedule the next attempt, or give up.
    fn fail(&mut self, now: Instant, reason: &str, events: &mut Vec<TransportEvent>) {
        self.drop_link();
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            warn!(
                game_code = %self.game_code,
                attempts = self.reconnect_attempts,
                reason,
                "giving up on relay"
            );
            self.close_fatally(events);
            return;
        }
        self.reconnect_attempts += 1;
        let delay = self.config.backoff_delay(self.reconnect_attempts);
        info!(
            game_code = %self.game_code,
            attempt = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            reason,
            "reconnecting"
        );
        self.state = TransportState::Reconnecting;
        self.retry_at = Some(now + delay);
        events.push(TransportEvent::Reconnecting {
            attempt: self.reconnect_attempts,
            delay_ms: delay.as_millis() as u64,
        });
    }

    fn close_fatally(&mut self, events: &mut Vec<TransportEvent>) {
        self.drop_link();
        self.state = TransportState::Closed;
        self.retry_at = None;
        if !self.disconnect_reported {
            self.disconnect_reported = true;
            events.push(TransportEvent::Disconnected);
        }
    }
}

impl<C: Connector> Drop for TransportSession<C> {
    fn drop(&mut self) {
        self.drop_link();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct LinkState {
        sent: Vec<ClientMessage>,
        inbound: VecDeque<LinkEvent>,
        fail_sends: bool,
        closed: bool,
    }

    struct MockLink(Rc<RefCell<LinkState>>);

    impl Link for MockLink {
        fn send(&mut self, message: &ClientMessage) -> Result<(), LinkError> {
            let mut state = self.0.borrow_mut();
            if state.fail_sends || state.closed {
                return Err(LinkError::Closed);
            }
            state.sent.push(message.clone());
            Ok(())
        }

        fn poll(&mut self) -> Vec<LinkEvent> {
            self.0.borrow_mut().inbound.drain(..).collect()
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    /// Hands out fresh links while `accept` is set; every link it opened is
    /// kept in `links` for inspection.
    #[derive(Default)]
    struct Script {
        refuse: bool,
        links: Vec<Rc<RefCell<LinkState>>>,
        opens: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector(Rc<RefCell<Script>>);

    impl Connector for ScriptedConnector {
        type Link = MockLink;

        fn open(&mut self) -> Result<MockLink, LinkError> {
            let mut script = self.0.borrow_mut();
            script.opens += 1;
            if script.refuse {
                return Err(LinkError::Connect(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                )));
            }
            let state = Rc::new(RefCell::new(LinkState::default()));
            script.links.push(Rc::clone(&state));
            Ok(MockLink(state))
        }
    }

    impl ScriptedConnector {
        fn latest(&self) -> Rc<RefCell<LinkState>> {
            Rc::clone(self.0.borrow().links.last().unwrap())
        }

        fn push(&self, message: ServerMessage) {
            self.latest()
                .borrow_mut()
                .inbound
                .push_back(LinkEvent::Message(message));
        }

        fn set_refuse(&self, refuse: bool) {
            self.0.borrow_mut().refuse = refuse;
        }

        fn opens(&self) -> usize {
            self.0.borrow().opens
        }
    }

    fn code() -> GameCode {
        "ABC123".parse().unwrap()
    }

    fn session(is_host: bool) -> (TransportSession<ScriptedConnector>, ScriptedConnector) {
        let connector = ScriptedConnector::default();
        let session = TransportSession::new(
            connector.clone(),
            TransportConfig::default(),
            code(),
            "client_a",
            is_host,
        );
        (session, connector)
    }

    /// Connect and complete the handshake at `t0`.
    fn established(is_host: bool, t0: Instant) -> (TransportSession<ScriptedConnector>, ScriptedConnector) {
        let (mut session, connector) = session(is_host);
        assert!(session.connect(t0));
        connector.push(ServerMessage::GameCreated { game_code: code() });
        let events = session.poll(t0);
        assert_eq!(events, vec![TransportEvent::Established { reconnected: false }]);
        (session, connector)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn host_creates_guest_joins() {
        let t0 = Instant::now();
        let (mut host, host_conn) = session(true);
        host.connect(t0);
        assert!(matches!(
            host_conn.latest().borrow().sent[0],
            ClientMessage::CreateGame { .. }
        ));

        let (mut guest, guest_conn) = session(false);
        guest.connect(t0);
        assert_eq!(
            guest_conn.latest().borrow().sent[0],
            ClientMessage::JoinGame {
                game_code: code(),
                member_id: "client_a".into()
            }
        );
        assert_eq!(guest.state(), TransportState::Connecting);
        assert!(!guest.connect(t0));
    }

    #[test]
    fn send_requires_connected() {
        let t0 = Instant::now();
        let (mut session, connector) = session(false);
        assert!(!session.send(json!({"type": "ping"})));
        session.connect(t0);
        assert!(!session.send(json!({"type": "ping"})));

        connector.push(ServerMessage::GameJoined { game_code: code() });
        session.poll(t0);
        assert!(session.send(json!({"type": "ping"})));
        assert_eq!(
            connector.latest().borrow().sent.last(),
            Some(&ClientMessage::GameData {
                payload: json!({"type": "ping"})
            })
        );
    }

    #[test]
    fn inbound_messages_become_events() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        connector.push(ServerMessage::GameReady {
            game_code: code(),
            members: vec!["client_a".into(), "client_b".into()],
        });
        connector.push(ServerMessage::GameData {
            payload: json!({"type": "client_info"}),
        });
        connector.push(ServerMessage::PeerDisconnected {
            member_id: "client_b".into(),
        });
        connector.push(ServerMessage::PeerLeft {
            member_id: "client_b".into(),
        });
        let events = session.poll(t0 + ms(10));
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], TransportEvent::Payload(json!({"type": "client_info"})));
        assert_eq!(
            events[3],
            TransportEvent::PeerLeft {
                member_id: "client_b".into()
            }
        );
    }

    #[test]
    fn heartbeat_on_interval_and_ack_keeps_alive() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        assert_eq!(session.next_deadline(), Some(t0 + ms(5_000)));

        session.poll(t0 + ms(4_999));
        assert_eq!(connector.latest().borrow().sent.len(), 1);
        session.poll(t0 + ms(5_000));
        assert_eq!(
            connector.latest().borrow().sent.last(),
            Some(&ClientMessage::Heartbeat)
        );

        connector.push(ServerMessage::HeartbeatAck);
        session.poll(t0 + ms(5_100));
        session.poll(t0 + ms(10_000));
        connector.push(ServerMessage::HeartbeatAck);
        session.poll(t0 + ms(10_100));
        assert!(session.is_connected());
        // Timeout is measured from the last ack.
        session.poll(t0 + ms(25_000));
        assert!(session.is_connected());
    }

    #[test]
    fn silence_triggers_reconnect_and_new_handshake() {
        let t0 = Instant::now();
        let (mut session, connector) = established(false, t0);

        let events = session.poll(t0 + ms(15_000));
        assert!(events.contains(&TransportEvent::Reconnecting {
            attempt: 1,
            delay_ms: 1_000
        }));
        assert_eq!(session.state(), TransportState::Reconnecting);
        assert!(connector.latest().borrow().closed);
        assert!(!session.send(json!({})));

        session.poll(t0 + ms(16_000));
        assert_eq!(connector.opens(), 2);
        assert!(matches!(
            connector.latest().borrow().sent[0],
            ClientMessage::JoinGame { .. }
        ));
        connector.push(ServerMessage::GameJoined { game_code: code() });
        let events = session.poll(t0 + ms(16_050));
        assert_eq!(events, vec![TransportEvent::Established { reconnected: true }]);
        assert!(session.is_connected());
    }

    #[test]
    fn closed_link_reconnects() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        connector.latest().borrow_mut().inbound.push_back(LinkEvent::Closed);
        let events = session.poll(t0 + ms(1));
        assert_eq!(
            events,
            vec![TransportEvent::Reconnecting {
                attempt: 1,
                delay_ms: 1_000
            }]
        );
    }

    #[test]
    fn failed_send_reconnects_on_next_poll() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        connector.latest().borrow_mut().fail_sends = true;
        assert!(!session.send(json!({"type": "attack"})));
        assert!(!session.send(json!({"type": "attack"})));
        let events = session.poll(t0 + ms(1));
        assert_eq!(events.len(), 1);
        assert_eq!(session.state(), TransportState::Reconnecting);
    }

    #[test]
    fn handshake_timeout_counts_as_failure() {
        let t0 = Instant::now();
        let (mut session, _connector) = session(true);
        session.connect(t0);
        assert!(session.poll(t0 + ms(19_999)).is_empty());
        let events = session.poll(t0 + ms(20_000));
        assert_eq!(
            events,
            vec![TransportEvent::Reconnecting {
                attempt: 1,
                delay_ms: 1_000
            }]
        );
    }

    #[test]
    fn refused_handshake_is_fatal() {
        let t0 = Instant::now();
        let (mut session, connector) = session(false);
        session.connect(t0);
        connector.push(ServerMessage::Error {
            reason: "game ABC123 not found".into(),
        });
        let events = session.poll(t0);
        assert_eq!(
            events,
            vec![
                TransportEvent::Rejected {
                    reason: "game ABC123 not found".into()
                },
                TransportEvent::Disconnected
            ]
        );
        assert_eq!(session.state(), TransportState::Closed);
        assert!(session.poll(t0 + ms(60_000)).is_empty());
    }

    /// The link drops mid-heartbeat and the relay never comes back: the
    /// fatal event fires once after the last backoff, however often we poll.
    #[test]
    fn gives_up_once_after_max_attempts() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        session.poll(t0 + ms(5_000));
        connector.set_refuse(true);
        connector.latest().borrow_mut().inbound.push_back(LinkEvent::Closed);

        let mut now = t0 + ms(5_001);
        let mut all = Vec::new();
        let mut delays = Vec::new();
        for _ in 0..2_000 {
            for event in session.poll(now) {
                if let TransportEvent::Reconnecting { delay_ms, .. } = event {
                    delays.push(delay_ms);
                }
                all.push(event);
            }
            // Several polls inside every backoff window.
            now += ms(250);
        }

        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000]);
        let fatal = all
            .iter()
            .filter(|e| **e == TransportEvent::Disconnected)
            .count();
        assert_eq!(fatal, 1);
        assert_eq!(session.state(), TransportState::Closed);
        // The initial connection plus one open per retry.
        assert_eq!(connector.opens(), 6);
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn successful_reconnect_resets_budget() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        for round in 0..8u64 {
            let base = t0 + ms(round * 10_000);
            connector.latest().borrow_mut().inbound.push_back(LinkEvent::Closed);
            let events = session.poll(base + ms(1));
            assert!(events.contains(&TransportEvent::Reconnecting {
                attempt: 1,
                delay_ms: 1_000
            }));
            session.poll(base + ms(1_001));
            connector.push(ServerMessage::GameCreated { game_code: code() });
            session.poll(base + ms(1_002));
            assert!(session.is_connected());
        }
    }

    #[test]
    fn disconnect_says_goodbye_without_fatal_event() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        let link = connector.latest();
        session.disconnect();
        assert_eq!(link.borrow().sent.last(), Some(&ClientMessage::Goodbye));
        assert!(link.borrow().closed);
        assert_eq!(session.state(), TransportState::Closed);
        assert!(session.poll(t0 + ms(100_000)).is_empty());
        assert!(!session.send(json!({})));
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let t0 = Instant::now();
        let (mut session, connector) = established(true, t0);
        connector.push(ServerMessage::GameCreated { game_code: code() });
        assert!(session.poll(t0 + ms(1)).is_empty());
    }
}
