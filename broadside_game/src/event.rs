// Room notifications for the presentation layer.
//
// The room never calls back into anything except the listeners registered
// here. Listeners form an explicit ordered list: each `subscribe` appends one
// and returns a `ListenerId` that can later be passed to `unsubscribe`. Every
// event is delivered to every listener, in subscription order, synchronously
// from inside the room operation that caused it.
//
// See also: `room.rs` for where each event is emitted.
//
// **Critical constraint: listeners must not call back into the room.** They
// receive `&RoomEvent` while the room is mid-update; the borrow checker
// enforces this since the room is exclusively borrowed during dispatch.

use broadside_protocol::{ClientId, GamePhase};

use crate::ship::ShipId;

/// Something the presentation layer may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    ClientJoined { client_id: ClientId },
    ClientLeft { client_id: ClientId },
    /// The relay reported that a peer's link dropped without a goodbye. The
    /// peer may still come back; its record is untouched.
    ClientDisconnected { client_id: ClientId },
    GameStateChanged { phase: GamePhase },
    ClientReadyChanged { client_id: ClientId, ready: bool },
    /// Every participant is ready. Fired once per transition.
    AllClientsReady,
    /// `None` when the ring is empty or the game is not in battle.
    TurnChanged { client_id: Option<ClientId> },
    /// A local ship was placed.
    ShipPlaced { ship_id: ShipId },
    /// The verdict on one of our own attacks.
    AttackResult {
        target_id: ClientId,
        row: usize,
        col: usize,
        hit: bool,
        ship_id: Option<ShipId>,
        sunk_ship_id: Option<ShipId>,
    },
    /// An opponent's shot landed on our board.
    IncomingAttack {
        attacker_id: ClientId,
        row: usize,
        col: usize,
        hit: bool,
        sunk_ship_id: Option<ShipId>,
    },
    /// Terminal. `None` means no participant is left standing.
    GameOver { winner_id: Option<ClientId> },
    /// Terminal. The transport gave up reconnecting.
    ConnectionLost,
    /// A payload with a `type` the room does not understand, passed through
    /// verbatim.
    Unhandled(serde_json::Value),
}

/// Handle returned by `subscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&RoomEvent) + Send>;

/// Ordered subscriber list.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&RoomEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn emit(&mut self, event: &RoomEvent) {
        for (_, listener) in &mut self.entries {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}
