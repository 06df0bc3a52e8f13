// Per-client record held by every room.
//
// For the local participant `board` is authoritative: it holds real ship
// positions and is the only board `process_attack` ever runs on. For a remote
// participant `board` is a replica that starts empty and only learns `Hit`
// and `Miss` cells from `attack_result` messages this client received as the
// attacker.

use std::collections::BTreeSet;

use broadside_protocol::ClientId;

use crate::board::Board;
use crate::ship::{FLEET, ShipId};

/// One shot this participant fired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttackRecord {
    pub target_id: ClientId,
    pub row: usize,
    pub col: usize,
    pub hit: bool,
    pub ship_id: Option<ShipId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: ClientId,
    pub is_host: bool,
    pub is_local: bool,
    pub ready: bool,
    pub board: Board,
    pub placed_ships: BTreeSet<ShipId>,
    pub sunk_ships: Vec<ShipId>,
    /// All ships sunk; skipped by turn rotation.
    pub eliminated: bool,
    pub attacks: Vec<AttackRecord>,
    pub hits: u32,
    pub misses: u32,
}

impl Participant {
    pub fn new(id: ClientId, is_host: bool, is_local: bool) -> Self {
        Self {
            id,
            is_host,
            is_local,
            ready: false,
            board: Board::new(),
            placed_ships: BTreeSet::new(),
            sunk_ships: Vec::new(),
            eliminated: false,
            attacks: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn has_full_fleet(&self) -> bool {
        FLEET.iter().all(|ship| self.placed_ships.contains(&ship.id))
    }

    pub fn record_sunk(&mut self, ship_id: ShipId) {
        if !self.sunk_ships.contains(&ship_id) {
            self.sunk_ships.push(ship_id);
        }
    }

    pub fn record_attack(&mut self, record: AttackRecord) {
        if record.hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.attacks.push(record);
    }
}
