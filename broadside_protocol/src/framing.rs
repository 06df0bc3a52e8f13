// Length-delimited message framing over TCP.
//
// Wire format for the relay envelope (`message.rs`): a 4-byte big-endian
// length prefix followed by the JSON-encoded message. `write_message` and
// `read_message` move raw bytes only; JSON encoding is done by the caller via
// `encode`/`decode`, which keeps the framing independent of message types.
//
// `MAX_MESSAGE_SIZE` (64 KiB) bounds allocation from a corrupt or hostile
// length prefix. Room payloads are a few hundred bytes at most; the largest
// is a `game_state_change` carrying the full client order.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum allowed message size in bytes.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Write a length-delimited message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(msg)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited message: 4-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes before or during a message,
/// and `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// JSON-encode `msg` and write it as one frame.
pub fn encode<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let json = serde_json::to_vec(msg).map_err(io::Error::from)?;
    write_message(writer, &json)
}

/// Read one frame and JSON-decode it. Malformed JSON is `InvalidData`.
pub fn decode<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let bytes = read_message(reader)?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
}
