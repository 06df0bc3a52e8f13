// Room state machine: client registry, turn ring, readiness gate, attack
// protocol, and termination detection for one game code.
//
// The room is fed two kinds of input, one at a time, by its owner:
// - Inbound room payloads (`handle_payload` / `handle_message`), decoded from
//   the transport's `GameData`.
// - Local commands (`place_ship`, `mark_ready`, `attack_client`,
//   `start_battle`, `advance_turn`, `leave`) issued by the presentation layer.
// Outbound messages go through the `RoomLink` trait, whose `send` returns
// false when the message was dropped locally. Nothing here blocks or spawns.
//
// Authority model: the host is the single writer of `phase`,
// `client_order`, and `current_turn_index`, and publishes them in
// `game_state_change`. A non-host applies those broadcasts verbatim. The only
// local adjustments a non-host makes are structural: appending a newly
// announced peer to the ring, compacting the ring when a peer leaves, and
// finishing the game when the host itself leaves.
//
// Termination: a participant is out once its owner reports `eliminated` in an
// `attack_result` (computed with `are_all_ships_sunk` on the owner's
// authoritative board). The host ends the game when at most one participant
// remains active and broadcasts `game_over`.
//
// Delivery is best-effort and may duplicate. Every handler is written to be
// idempotent: repeated `client_info`/`client_ready` change nothing and results
// are deduplicated on `(attacker, defender, row, col)`. The defender keeps
// every result it produced; a repeated attack on an answered cell gets the
// stored result again instead of a second resolution, and results whose send
// was dropped go out again on the next `announce`. The attacker likewise
// re-sends its unanswered attack when it re-announces, so one lost message
// cannot leave the turn stuck.
//
// See also: `board.rs` for the grid rules, `event.rs` for notifications,
// `broadside_protocol::room` for the wire shapes, and the `broadside_session`
// crate for the pump that drives a room from a transport session.

use std::collections::{BTreeMap, BTreeSet};

use broadside_protocol::{ClientId, GameCode, GamePhase, RoomMessage};
use tracing::{debug, info, warn};

use crate::board::{Board, Orientation};
use crate::event::{ListenerId, Listeners, RoomEvent};
use crate::participant::{AttackRecord, Participant};
use crate::ship::ShipId;

/// Outbound half of the room's channel.
pub trait RoomLink {
    /// Send one room message to every other participant. Returns false if the
    /// message was dropped locally (e.g. the transport is not connected).
    fn send(&mut self, message: &RoomMessage) -> bool;
}

/// A read-only copy of the room's state for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomSnapshot {
    pub game_code: GameCode,
    pub local_id: ClientId,
    pub is_host: bool,
    pub clients: BTreeMap<ClientId, Participant>,
    pub client_order: Vec<ClientId>,
    pub current_turn_index: usize,
    pub phase: GamePhase,
    pub winner_id: Option<ClientId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingAttack {
    target_id: ClientId,
    row: usize,
    col: usize,
}

type ResultKey = (ClientId, ClientId, usize, usize);

/// `(attacker, row, col)` of a shot at the local board.
type AnswerKey = (ClientId, usize, usize);

pub struct Room<L> {
    link: L,
    game_code: GameCode,
    local_id: ClientId,
    is_host: bool,
    clients: BTreeMap<ClientId, Participant>,
    client_order: Vec<ClientId>,
    current_turn_index: usize,
    phase: GamePhase,
    winner_id: Option<ClientId>,
    pending_attack: Option<PendingAttack>,
    seen_results: BTreeSet<ResultKey>,
    answers: BTreeMap<AnswerKey, RoomMessage>,
    unsent_answers: BTreeSet<AnswerKey>,
    all_ready_reported: bool,
    game_over_reported: bool,
    connection_lost: bool,
    left: bool,
    listeners: Listeners,
}

impl<L: RoomLink> Room<L> {
    /// Create a room holding only the local participant, in `Setup`. Nothing
    /// is sent until the owner calls `announce` (normally once the transport
    /// reports the connection established).
    pub fn new(link: L, game_code: GameCode, is_host: bool, local_id: ClientId) -> Self {
        let mut clients = BTreeMap::new();
        clients.insert(
            local_id.clone(),
            Participant::new(local_id.clone(), is_host, true),
        );
        Self {
            link,
            game_code,
            local_id: local_id.clone(),
            is_host,
            clients,
            client_order: vec![local_id],
            current_turn_index: 0,
            phase: GamePhase::Setup,
            winner_id: None,
            pending_attack: None,
            seen_results: BTreeSet::new(),
            answers: BTreeMap::new(),
            unsent_answers: BTreeSet::new(),
            all_ready_reported: false,
            game_over_reported: false,
            connection_lost: false,
            left: false,
            listeners: Listeners::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn game_code(&self) -> &GameCode {
        &self.game_code
    }

    pub fn local_id(&self) -> &ClientId {
        &self.local_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn winner_id(&self) -> Option<&ClientId> {
        self.winner_id.as_ref()
    }

    pub fn client_order(&self) -> &[ClientId] {
        &self.client_order
    }

    pub fn current_turn_index(&self) -> usize {
        self.current_turn_index
    }

    /// Whose turn it is. `None` outside of battle.
    pub fn current_turn_client_id(&self) -> Option<&ClientId> {
        if self.phase != GamePhase::Battle {
            return None;
        }
        self.client_order.get(self.current_turn_index)
    }

    pub fn is_local_turn(&self) -> bool {
        self.current_turn_client_id() == Some(&self.local_id)
    }

    pub fn client(&self, id: &ClientId) -> Option<&Participant> {
        self.clients.get(id)
    }

    pub fn local(&self) -> Option<&Participant> {
        self.clients.get(&self.local_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_pending_attack(&self) -> bool {
        self.pending_attack.is_some()
    }

    /// True once the game finished, the connection was lost, or we left.
    /// Every command is rejected from then on.
    pub fn is_closed(&self) -> bool {
        self.left || self.connection_lost || self.phase == GamePhase::Finished
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            game_code: self.game_code.clone(),
            local_id: self.local_id.clone(),
            is_host: self.is_host,
            clients: self.clients.clone(),
            client_order: self.client_order.clone(),
            current_turn_index: self.current_turn_index,
            phase: self.phase,
            winner_id: self.winner_id.clone(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&RoomEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    fn emit(&mut self, event: RoomEvent) {
        self.listeners.emit(&event);
    }

    fn send(&mut self, message: RoomMessage) -> bool {
        let sent = self.link.send(&message);
        if !sent {
            debug!(kind = message.kind(), "room message dropped locally");
        }
        sent
    }

    // -----------------------------------------------------------------------
    // Local commands
    // -----------------------------------------------------------------------

    /// Announce the local participant: `client_info`, then `client_ready` if
    /// already ready, and on the host the full game state. In battle it also
    /// re-sends attack results that were dropped and our own unanswered
    /// attack. Called after every (re)connection; receivers treat repeats as
    /// no-ops.
    pub fn announce(&mut self) -> bool {
        if self.left || self.connection_lost {
            return false;
        }
        let sent = self.send(RoomMessage::ClientInfo {
            client_id: self.local_id.clone(),
            is_host: self.is_host,
        });
        self.resend_ready();
        if self.is_host {
            self.broadcast_state();
        }
        if self.phase == GamePhase::Battle {
            self.resend_unsent_answers();
            self.resend_pending_attack();
        }
        sent
    }

    /// Place one ship of the local fleet. Only before the local participant is
    /// ready, in `Setup` or `Placement`. On the host the first placement opens
    /// the `Placement` phase for everyone.
    pub fn place_ship(
        &mut self,
        ship_id: ShipId,
        row: usize,
        col: usize,
        orientation: Orientation,
    ) -> bool {
        if self.is_closed() || !self.in_lobby() {
            return false;
        }
        let Some(local) = self.clients.get_mut(&self.local_id) else {
            return false;
        };
        if local.ready || local.placed_ships.contains(&ship_id) {
            return false;
        }
        let ship = ship_id.ship();
        if !local.board.is_valid_placement(&ship, row, col, orientation) {
            return false;
        }
        local.board = local.board.place_ship(&ship, row, col, orientation);
        local.placed_ships.insert(ship_id);
        self.emit(RoomEvent::ShipPlaced { ship_id });

        if self.is_host && self.phase == GamePhase::Setup {
            self.set_phase(GamePhase::Placement);
            self.broadcast_state();
        }
        true
    }

    /// Remove every placed ship from the local board. Rejected once ready.
    pub fn clear_ships(&mut self) -> bool {
        if self.is_closed() || !self.in_lobby() {
            return false;
        }
        let Some(local) = self.clients.get_mut(&self.local_id) else {
            return false;
        };
        if local.ready {
            return false;
        }
        local.board = Board::new();
        local.placed_ships.clear();
        true
    }

    /// Set the local ready flag and broadcast it. Ready requires the full
    /// fleet on the board. If the broadcast is dropped the flag is reverted.
    pub fn mark_ready(&mut self, ready: bool) -> bool {
        if self.is_closed() || !self.in_lobby() {
            return false;
        }
        let Some(local) = self.clients.get_mut(&self.local_id) else {
            return false;
        };
        if ready && !local.has_full_fleet() {
            debug!("ready rejected: fleet incomplete");
            return false;
        }
        let previous = local.ready;
        local.ready = ready;

        let sent = self.send(RoomMessage::ClientReady {
            client_id: self.local_id.clone(),
            ready,
        });
        if !sent {
            if let Some(local) = self.clients.get_mut(&self.local_id) {
                local.ready = previous;
            }
            return false;
        }
        if previous != ready {
            self.emit(RoomEvent::ClientReadyChanged {
                client_id: self.local_id.clone(),
                ready,
            });
        }
        self.check_all_ready();
        true
    }

    /// Re-broadcast `client_ready` while the local participant is ready and
    /// the battle has not started. Returns whether a message went out.
    pub fn resend_ready(&mut self) -> bool {
        let ready = self.local().is_some_and(|p| p.ready);
        if !ready || self.is_closed() || !self.in_lobby() {
            return false;
        }
        self.send(RoomMessage::ClientReady {
            client_id: self.local_id.clone(),
            ready: true,
        })
    }

    /// Fire at `(row, col)` on `target_id`'s board. Rejected unless it is our
    /// turn, the target is another active participant, the cell is on the
    /// grid and not yet resolved in our replica, and no earlier attack is
    /// still awaiting its result.
    pub fn attack_client(&mut self, target_id: &ClientId, row: usize, col: usize) -> bool {
        if self.is_closed() || !self.is_local_turn() {
            debug!(target_id = %target_id, "attack rejected: not our turn");
            return false;
        }
        if *target_id == self.local_id || self.pending_attack.is_some() {
            return false;
        }
        if self.local().is_none_or(|p| p.eliminated) {
            return false;
        }
        let Some(target) = self.clients.get(target_id) else {
            return false;
        };
        if target.eliminated {
            return false;
        }
        match target.board.cell(row, col) {
            Some(cell) if !cell.state.is_resolved() => {}
            _ => return false,
        }

        let sent = self.send(RoomMessage::Attack {
            from_client_id: self.local_id.clone(),
            to_client_id: target_id.clone(),
            row,
            col,
        });
        if sent {
            self.pending_attack = Some(PendingAttack {
                target_id: target_id.clone(),
                row,
                col,
            });
        }
        sent
    }

    /// Host only: begin the battle with the first participant in the ring.
    /// Requires at least two participants, all of them ready.
    pub fn start_battle(&mut self) -> bool {
        if !self.is_host || self.is_closed() || !self.in_lobby() {
            return false;
        }
        if self.clients.len() < 2 || !self.clients.values().all(|p| p.ready) {
            debug!(clients = self.clients.len(), "start_battle rejected");
            return false;
        }
        self.current_turn_index = 0;
        self.pending_attack = None;
        self.set_phase(GamePhase::Battle);
        if !self.broadcast_state() {
            warn!("battle start broadcast dropped; peers converge on next announce");
        }
        self.emit_turn();
        true
    }

    /// Host only: pass the turn to the next slot in the ring.
    pub fn advance_turn(&mut self) -> bool {
        if !self.is_host || self.phase != GamePhase::Battle || self.client_order.is_empty() {
            return false;
        }
        self.current_turn_index = (self.current_turn_index + 1) % self.client_order.len();
        self.publish_turn();
        true
    }

    /// Announce our departure to the room. Later commands are rejected.
    pub fn leave(&mut self) -> bool {
        if self.left {
            return false;
        }
        let sent = self.send(RoomMessage::ClientLeft {
            client_id: self.local_id.clone(),
        });
        self.left = true;
        self.pending_attack = None;
        info!(game_code = %self.game_code, "left room");
        sent
    }

    /// The transport gave up. Reported once; the room is finished afterwards.
    pub fn connection_lost(&mut self) {
        if self.connection_lost {
            return;
        }
        self.connection_lost = true;
        self.pending_attack = None;
        self.phase = GamePhase::Finished;
        warn!(game_code = %self.game_code, "connection lost");
        self.emit(RoomEvent::ConnectionLost);
    }

    /// The relay saw `client_id`'s link drop. Informational; the peer keeps
    /// its place and may re-announce after reconnecting.
    pub fn client_disconnected(&mut self, client_id: &ClientId) {
        if self.clients.contains_key(client_id) {
            self.emit(RoomEvent::ClientDisconnected {
                client_id: client_id.clone(),
            });
        }
    }

    /// `client_id` left for good, as reported by the relay.
    pub fn peer_left(&mut self, client_id: &ClientId) {
        self.remove_client(client_id);
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    /// Decode and apply one room payload. Unknown types are passed to the
    /// listeners verbatim; malformed known types are dropped.
    pub fn handle_payload(&mut self, payload: &serde_json::Value) {
        match RoomMessage::from_payload(payload) {
            Ok(RoomMessage::Unknown) => self.emit(RoomEvent::Unhandled(payload.clone())),
            Ok(message) => self.handle_message(message),
            Err(e) => debug!(error = %e, "dropping malformed room message"),
        }
    }

    pub fn handle_message(&mut self, message: RoomMessage) {
        if self.left || self.connection_lost {
            debug!(kind = message.kind(), "room closed, ignoring message");
            return;
        }
        match message {
            RoomMessage::ClientInfo { client_id, is_host } => {
                self.handle_client_info(client_id, is_host);
            }
            RoomMessage::ClientReady { client_id, ready } => {
                self.handle_client_ready(client_id, ready);
            }
            RoomMessage::GameStateChange {
                state,
                client_order,
                current_turn_index,
            } => self.handle_game_state_change(state, client_order, current_turn_index),
            RoomMessage::Attack {
                from_client_id,
                to_client_id,
                row,
                col,
            } => self.handle_attack(from_client_id, to_client_id, row, col),
            RoomMessage::AttackResult {
                from_client_id,
                to_client_id,
                row,
                col,
                hit,
                ship_id,
                sunk_ship_id,
                eliminated,
            } => self.handle_attack_result(
                from_client_id,
                to_client_id,
                row,
                col,
                hit,
                parse_ship(ship_id),
                parse_ship(sunk_ship_id),
                eliminated,
            ),
            RoomMessage::GameOver { winner_id } => {
                // Only the host decides the outcome.
                if !self.is_host {
                    self.finish(winner_id);
                }
            }
            RoomMessage::ClientLeft { client_id } => self.remove_client(&client_id),
            RoomMessage::Ping | RoomMessage::Pong => {}
            RoomMessage::Unknown => {}
        }
    }

    fn handle_client_info(&mut self, client_id: ClientId, is_host: bool) {
        if client_id == self.local_id {
            return;
        }
        if let Some(existing) = self.clients.get_mut(&client_id) {
            existing.is_host = is_host;
        } else {
            info!(client_id = %client_id, is_host, "client joined");
            self.clients.insert(
                client_id.clone(),
                Participant::new(client_id.clone(), is_host, false),
            );
            self.client_order.push(client_id.clone());
            self.emit(RoomEvent::ClientJoined {
                client_id: client_id.clone(),
            });
            // Let the newcomer learn about us too.
            self.send(RoomMessage::ClientInfo {
                client_id: self.local_id.clone(),
                is_host: self.is_host,
            });
            self.check_all_ready();
        }
        self.resend_ready();
        if self.is_host {
            self.broadcast_state();
        }
    }

    fn handle_client_ready(&mut self, client_id: ClientId, ready: bool) {
        if client_id == self.local_id {
            return;
        }
        let Some(client) = self.clients.get_mut(&client_id) else {
            debug!(client_id = %client_id, "ready from unknown client");
            return;
        };
        if client.ready == ready {
            return;
        }
        client.ready = ready;
        self.emit(RoomEvent::ClientReadyChanged { client_id, ready });
        self.check_all_ready();
    }

    fn handle_game_state_change(
        &mut self,
        state: GamePhase,
        client_order: Option<Vec<ClientId>>,
        current_turn_index: Option<usize>,
    ) {
        if self.is_host || self.phase == GamePhase::Finished {
            return;
        }
        if let Some(order) = &client_order {
            if !order.contains(&self.local_id) {
                // The host has not seen our client_info yet; a fresh
                // broadcast follows once it does.
                debug!("ignoring game state that predates our announcement");
                return;
            }
        }
        let previous_phase = self.phase;
        let previous_turn = self.current_turn_client_id().cloned();

        if let Some(order) = client_order {
            self.apply_order(order, state);
        }
        if let Some(index) = current_turn_index {
            if index < self.client_order.len() {
                self.current_turn_index = index;
            } else {
                debug!(index, len = self.client_order.len(), "turn index out of range");
            }
        }
        if self.current_turn_index >= self.client_order.len() {
            self.current_turn_index = 0;
        }
        if state != previous_phase {
            self.set_phase(state);
        }
        if self.phase == GamePhase::Battle
            && (previous_phase != GamePhase::Battle
                || self.current_turn_client_id() != previous_turn.as_ref())
        {
            self.emit_turn();
        }
    }

    /// Replace the ring with the host's, creating and dropping records so the
    /// ring stays a permutation of the client map.
    ///
    /// Before battle a peer missing from the host's order is kept, with its
    /// ready flag, at the tail of the ring: the host's broadcast may predate
    /// that peer's `client_info`. Departures in the lobby arrive as
    /// `client_left` or a relay notice instead.
    fn apply_order(&mut self, order: Vec<ClientId>, state: GamePhase) {
        let mut seen = BTreeSet::new();
        let mut order: Vec<ClientId> =
            order.into_iter().filter(|id| seen.insert(id.clone())).collect();

        let stale: Vec<ClientId> = self
            .clients
            .keys()
            .filter(|id| **id != self.local_id && !seen.contains(*id))
            .cloned()
            .collect();
        let lobby = matches!(state, GamePhase::Setup | GamePhase::Placement);
        for id in stale {
            if lobby {
                debug!(client_id = %id, "keeping peer the host has not listed yet");
                order.push(id);
            } else {
                self.clients.remove(&id);
                self.emit(RoomEvent::ClientLeft { client_id: id });
            }
        }
        for id in &order {
            if !self.clients.contains_key(id) {
                self.clients
                    .insert(id.clone(), Participant::new(id.clone(), false, false));
                self.emit(RoomEvent::ClientJoined {
                    client_id: id.clone(),
                });
            }
        }
        self.client_order = order;
    }

    fn handle_attack(&mut self, attacker_id: ClientId, defender_id: ClientId, row: usize, col: usize) {
        if defender_id != self.local_id || self.phase != GamePhase::Battle {
            return;
        }
        let key = (attacker_id.clone(), row, col);
        if self.answers.contains_key(&key) {
            debug!(row, col, attacker = %attacker_id, "repeat attack, answering again");
            self.send_answer(&key);
            return;
        }
        let Some(local) = self.clients.get_mut(&self.local_id) else {
            return;
        };
        if local.eliminated {
            return;
        }
        let outcome = match local.board.process_attack(row, col) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, attacker = %attacker_id, "ignoring attack");
                return;
            }
        };
        if outcome.already_attacked {
            debug!(row, col, attacker = %attacker_id, "ignoring repeat attack");
            return;
        }
        local.board = outcome.board;
        let sunk_ship_id = outcome
            .ship_id
            .filter(|id| outcome.hit && local.board.is_ship_sunk(*id));
        if let Some(id) = sunk_ship_id {
            local.record_sunk(id);
        }
        let eliminated = local.board.are_all_ships_sunk();
        if eliminated {
            local.eliminated = true;
            local.ready = false;
            info!("all local ships sunk");
        }

        self.seen_results
            .insert((attacker_id.clone(), self.local_id.clone(), row, col));
        self.answers.insert(
            key.clone(),
            RoomMessage::AttackResult {
                from_client_id: attacker_id.clone(),
                to_client_id: self.local_id.clone(),
                row,
                col,
                hit: outcome.hit,
                ship_id: outcome.ship_id.map(|id| id.as_str().to_owned()),
                sunk_ship_id: sunk_ship_id.map(|id| id.as_str().to_owned()),
                eliminated,
            },
        );
        self.send_answer(&key);
        self.emit(RoomEvent::IncomingAttack {
            attacker_id: attacker_id.clone(),
            row,
            col,
            hit: outcome.hit,
            sunk_ship_id,
        });

        if self.is_host {
            self.after_result(&attacker_id);
        }
    }

    #[expect(clippy::too_many_arguments)]
    fn handle_attack_result(
        &mut self,
        attacker_id: ClientId,
        defender_id: ClientId,
        row: usize,
        col: usize,
        hit: bool,
        ship_id: Option<ShipId>,
        sunk_ship_id: Option<ShipId>,
        eliminated: bool,
    ) {
        if self.phase != GamePhase::Battle {
            return;
        }
        let key = (attacker_id.clone(), defender_id.clone(), row, col);
        if !self.seen_results.insert(key) {
            debug!(row, col, attacker = %attacker_id, "duplicate attack result");
            return;
        }

        if let Some(defender) = self.clients.get_mut(&defender_id) {
            if let Some(id) = sunk_ship_id {
                defender.record_sunk(id);
            }
            if eliminated && !defender.eliminated {
                defender.eliminated = true;
                info!(client_id = %defender_id, "client eliminated");
            }
            if attacker_id == self.local_id {
                defender.board.mark_result(row, col, hit, ship_id);
            }
        }

        if attacker_id == self.local_id {
            let expected = PendingAttack {
                target_id: defender_id.clone(),
                row,
                col,
            };
            if self.pending_attack.as_ref() == Some(&expected) {
                self.pending_attack = None;
            }
            if let Some(local) = self.clients.get_mut(&self.local_id) {
                local.record_attack(AttackRecord {
                    target_id: defender_id.clone(),
                    row,
                    col,
                    hit,
                    ship_id,
                });
            }
            self.emit(RoomEvent::AttackResult {
                target_id: defender_id,
                row,
                col,
                hit,
                ship_id,
                sunk_ship_id,
            });
        }

        if self.is_host {
            self.after_result(&attacker_id);
        }
    }

    /// Send the stored result for `key`, remembering it for the next
    /// `announce` if the link drops it.
    fn send_answer(&mut self, key: &AnswerKey) -> bool {
        let Some(message) = self.answers.get(key).cloned() else {
            return false;
        };
        let sent = self.send(message);
        if sent {
            self.unsent_answers.remove(key);
        } else {
            warn!(row = key.1, col = key.2, attacker = %key.0, "attack result dropped; will resend");
            self.unsent_answers.insert(key.clone());
        }
        sent
    }

    fn resend_unsent_answers(&mut self) {
        let keys: Vec<AnswerKey> = self.unsent_answers.iter().cloned().collect();
        for key in keys {
            if !self.send_answer(&key) {
                break;
            }
        }
    }

    fn resend_pending_attack(&mut self) -> bool {
        let Some(pending) = self.pending_attack.clone() else {
            return false;
        };
        debug!(target_id = %pending.target_id, row = pending.row, col = pending.col, "re-sending unanswered attack");
        self.send(RoomMessage::Attack {
            from_client_id: self.local_id.clone(),
            to_client_id: pending.target_id,
            row: pending.row,
            col: pending.col,
        })
    }

    /// Host bookkeeping once a shot has been resolved: end the game or pass
    /// the turn on from the attacker.
    fn after_result(&mut self, attacker_id: &ClientId) {
        if self.check_termination() {
            return;
        }
        if self.current_turn_client_id() == Some(attacker_id) {
            self.advance_to_next_active();
        }
    }

    fn remove_client(&mut self, client_id: &ClientId) {
        if *client_id == self.local_id {
            return;
        }
        let Some(removed) = self.clients.remove(client_id) else {
            return;
        };
        info!(client_id = %client_id, "client left");
        let previous_turn = self.current_turn_client_id().cloned();

        if let Some(pos) = self.client_order.iter().position(|id| id == client_id) {
            self.client_order.remove(pos);
            if pos < self.current_turn_index {
                self.current_turn_index -= 1;
            }
        }
        if self.current_turn_index >= self.client_order.len() {
            self.current_turn_index = 0;
        }
        if self
            .pending_attack
            .as_ref()
            .is_some_and(|p| p.target_id == *client_id)
        {
            self.pending_attack = None;
        }
        self.emit(RoomEvent::ClientLeft {
            client_id: client_id.clone(),
        });

        if self.phase == GamePhase::Finished {
            return;
        }
        if removed.is_host && !self.is_host {
            info!("host left; game cannot continue");
            self.finish(None);
            return;
        }
        if self.is_host {
            match self.phase {
                GamePhase::Battle => {
                    if self.check_termination() {
                        return;
                    }
                    let holder_out = self
                        .current_turn_client_id()
                        .and_then(|id| self.clients.get(id))
                        .is_some_and(|p| p.eliminated);
                    if holder_out {
                        self.advance_to_next_active();
                        return;
                    }
                    self.broadcast_state();
                }
                GamePhase::Setup | GamePhase::Placement => {
                    self.broadcast_state();
                    self.check_all_ready();
                    return;
                }
                GamePhase::Finished => return,
            }
        }
        if self.phase == GamePhase::Battle
            && self.current_turn_client_id() != previous_turn.as_ref()
        {
            self.emit_turn();
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn in_lobby(&self) -> bool {
        matches!(self.phase, GamePhase::Setup | GamePhase::Placement)
    }

    fn set_phase(&mut self, phase: GamePhase) {
        info!(game_code = %self.game_code, from = ?self.phase, to = ?phase, "phase change");
        self.phase = phase;
        self.emit(RoomEvent::GameStateChanged { phase });
    }

    fn emit_turn(&mut self) {
        let client_id = self.current_turn_client_id().cloned();
        self.emit(RoomEvent::TurnChanged { client_id });
    }

    fn state_message(&self) -> RoomMessage {
        RoomMessage::GameStateChange {
            state: self.phase,
            client_order: Some(self.client_order.clone()),
            current_turn_index: Some(self.current_turn_index),
        }
    }

    fn broadcast_state(&mut self) -> bool {
        if !self.is_host {
            return false;
        }
        let message = self.state_message();
        self.send(message)
    }

    fn publish_turn(&mut self) {
        self.broadcast_state();
        self.emit_turn();
    }

    /// Step the ring forward, skipping eliminated participants, and publish
    /// the new turn once.
    fn advance_to_next_active(&mut self) {
        let len = self.client_order.len();
        if len == 0 {
            return;
        }
        for _ in 0..len {
            self.current_turn_index = (self.current_turn_index + 1) % len;
            let out = self
                .clients
                .get(&self.client_order[self.current_turn_index])
                .is_none_or(|p| p.eliminated);
            if !out {
                break;
            }
        }
        self.publish_turn();
    }

    fn check_all_ready(&mut self) {
        let all_ready = self.clients.len() >= 2 && self.clients.values().all(|p| p.ready);
        if !all_ready {
            self.all_ready_reported = false;
            return;
        }
        if !self.all_ready_reported {
            self.all_ready_reported = true;
            self.emit(RoomEvent::AllClientsReady);
        }
        if self.is_host && self.phase == GamePhase::Placement {
            self.start_battle();
        }
    }

    /// Host only: finish the game if at most one participant is still in it.
    fn check_termination(&mut self) -> bool {
        if !self.is_host || self.phase != GamePhase::Battle {
            return false;
        }
        let mut active = self
            .client_order
            .iter()
            .filter(|id| self.clients.get(*id).is_some_and(|p| !p.eliminated));
        let first = active.next().cloned();
        if active.next().is_some() {
            return false;
        }
        self.finish(first);
        true
    }

    fn finish(&mut self, winner_id: Option<ClientId>) {
        if self.game_over_reported {
            return;
        }
        self.game_over_reported = true;
        self.pending_attack = None;
        self.winner_id = winner_id.clone();
        info!(winner = ?winner_id.as_ref().map(ClientId::as_str), "game over");
        if self.phase != GamePhase::Finished {
            self.set_phase(GamePhase::Finished);
        }
        if self.is_host && !self.send(RoomMessage::GameOver {
            winner_id: winner_id.clone(),
        }) {
            warn!("game_over broadcast dropped");
        }
        self.emit(RoomEvent::GameOver { winner_id });
    }
}

fn parse_ship(id: Option<String>) -> Option<ShipId> {
    let id = id?;
    match id.parse() {
        Ok(ship) => Some(ship),
        Err(e) => {
            debug!(error = %e, "unknown ship id in attack result");
            None
        }
    }
}

impl<L> std::fmt::Debug for Room<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("game_code", &self.game_code)
            .field("local_id", &self.local_id)
            .field("is_host", &self.is_host)
            .field("phase", &self.phase)
            .field("client_order", &self.client_order)
            .field("current_turn_index", &self.current_turn_index)
            .finish_non_exhaustive()
    }
}
