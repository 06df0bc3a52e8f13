// Error types for the physical relay link and relay room admission.

use std::io;

use broadside_protocol::GameCode;

/// Failure on a single physical connection to the relay. The transport
/// session treats every variant the same way (drop the link, back off, retry);
/// the variants exist for logging.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("could not resolve relay address {0:?}")]
    Resolve(String),
    #[error("connect to relay failed: {0}")]
    Connect(#[source] io::Error),
    #[error("relay i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("link is closed")]
    Closed,
}

/// Why the relay refused a `CreateGame`/`JoinGame`. The `Display` text is sent
/// to the client as `ServerMessage::Error { reason }`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("game {0} not found")]
    NotFound(GameCode),
    #[error("game {0} is full")]
    Full(GameCode),
    #[error("member id must not be empty")]
    EmptyMemberId,
}
