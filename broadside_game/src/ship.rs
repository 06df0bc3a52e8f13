// The fixed fleet every participant places before battle.
//
// Five ships, sizes {5, 4, 3, 3, 2}. Ships are plain `Copy` values; a board
// cell records which ship covers it by `ShipId`, so there is no shared mutable
// ship object anywhere.
//
// Ship ids travel on the wire as lowercase strings ("carrier", "destroyer",
// ...) inside `attack_result` messages; `ShipId::from_str` maps them back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a ship in the fleet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipId {
    Carrier,
    Battleship,
    Cruiser,
    Submarine,
    Destroyer,
}

impl ShipId {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipId::Carrier => "carrier",
            ShipId::Battleship => "battleship",
            ShipId::Cruiser => "cruiser",
            ShipId::Submarine => "submarine",
            ShipId::Destroyer => "destroyer",
        }
    }

    /// The catalog entry for this id.
    pub fn ship(self) -> Ship {
        match self {
            ShipId::Carrier => FLEET[0],
            ShipId::Battleship => FLEET[1],
            ShipId::Cruiser => FLEET[2],
            ShipId::Submarine => FLEET[3],
            ShipId::Destroyer => FLEET[4],
        }
    }
}

impl fmt::Display for ShipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipId {
    type Err = UnknownShip;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FLEET
            .iter()
            .map(|ship| ship.id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownShip(s.to_owned()))
    }
}

/// A ship id string that is not in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown ship id {0:?}")]
pub struct UnknownShip(pub String);

/// One ship of the fleet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ship {
    pub id: ShipId,
    pub size: usize,
    pub name: &'static str,
}

/// The complete fleet, largest first.
pub const FLEET: [Ship; 5] = [
    Ship {
        id: ShipId::Carrier,
        size: 5,
        name: "Carrier",
    },
    Ship {
        id: ShipId::Battleship,
        size: 4,
        name: "Battleship",
    },
    Ship {
        id: ShipId::Cruiser,
        size: 3,
        name: "Cruiser",
    },
    Ship {
        id: ShipId::Submarine,
        size: 3,
        name: "Submarine",
    },
    Ship {
        id: ShipId::Destroyer,
        size: 2,
        name: "Destroyer",
    },
];
