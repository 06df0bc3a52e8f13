// Core ID and phase types shared by the relay envelope and room messages.
//
// `ClientId` and `GameCode` are string newtypes rather than compact integers:
// client ids are chosen by the clients themselves (there is no central
// allocator, the relay only forwards), and game codes are short strings that
// players read aloud or paste to each other.
//
// `GamePhase` lives here rather than in the game crate because it is carried
// verbatim inside `game_state_change` payloads.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of characters in a generated game code.
pub const GAME_CODE_LEN: usize = 6;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Opaque participant identifier, unique within one room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random local id of the form `client_<12 chars>`.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..12)
            .map(|_| {
                let idx = rng.random_range(0..CODE_ALPHABET.len());
                char::from(CODE_ALPHABET[idx]).to_ascii_lowercase()
            })
            .collect();
        Self(format!("client_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Short alphanumeric room code. Always stored uppercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameCode(String);

impl GameCode {
    /// Draw a fresh random code of `GAME_CODE_LEN` characters.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..GAME_CODE_LEN)
            .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for GameCode {
    type Err = GameCodeError;

    /// Parse user input. Surrounding whitespace is trimmed and letters are
    /// uppercased, so `" ab12cd"` and `"AB12CD"` name the same room.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(GameCodeError::Empty);
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(GameCodeError::InvalidChar(bad));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from parsing a `GameCode`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameCodeError {
    #[error("game code is empty")]
    Empty,
    #[error("game code contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Room lifecycle phase. The host is the only writer; everyone else mirrors
/// the host's broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Participants are joining.
    #[default]
    Setup,
    /// Participants are placing ships.
    Placement,
    /// Turns are being taken.
    Battle,
    /// Terminal: a winner (or no winner) has been decided.
    Finished,
}
