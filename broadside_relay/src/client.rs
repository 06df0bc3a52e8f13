// TCP implementation of the transport session's `Connector`/`Link` pair.
//
// Architecture, per link:
// - `TcpConnector::open()` resolves the relay address and connects with a
//   timeout on the calling thread, then spawns a background reader thread.
//   The connect is the only blocking step in the client: a transport poll
//   that opens a link can stall its caller for up to the connect timeout
//   (`DEFAULT_CONNECT_TIMEOUT` unless overridden). Everything after that is
//   non-blocking.
// - The reader thread calls `decode()` in a loop and pushes each
//   `ServerMessage` into an `mpsc` channel as `LinkEvent::Message`. On EOF, a
//   read error, or an undecodable frame it pushes `LinkEvent::Closed` and
//   exits.
// - The owning thread holds a `BufWriter<TcpStream>` for sending; writes are
//   small and flushed synchronously.
// - `poll()` drains the channel without blocking.
//
// `close()` shuts the socket down in both directions, which unblocks the
// reader thread. Dropping a `RelayLink` closes it.
//
// See also: `transport.rs` for the state machine that owns these links,
// `server.rs` for the relay on the other end.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use broadside_protocol::framing::{decode, encode};
use broadside_protocol::{ClientMessage, ServerMessage};
use tracing::debug;

use crate::error::LinkError;
use crate::transport::{Connector, Link, LinkEvent};

/// Upper bound on one connect attempt, and so on how long a transport poll
/// can block. Slow or absent relays fall back to the transport's backoff.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens `RelayLink`s to a fixed relay address.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Connector for TcpConnector {
    type Link = RelayLink;

    fn open(&mut self) -> Result<RelayLink, LinkError> {
        RelayLink::connect(&self.addr, self.connect_timeout)
    }
}

/// One TCP connection to the relay.
pub struct RelayLink {
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
    inbox: Receiver<LinkEvent>,
    _reader_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl RelayLink {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, LinkError> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|_| LinkError::Resolve(addr.to_owned()))?
            .next()
            .ok_or_else(|| LinkError::Resolve(addr.to_owned()))?;
        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(LinkError::Connect)?;
        stream.set_nodelay(true).ok();

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream.try_clone()?);

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        Ok(Self {
            stream,
            writer,
            inbox: rx,
            _reader_thread: Some(reader_thread),
            closed: false,
        })
    }
}

impl Link for RelayLink {
    fn send(&mut self, message: &ClientMessage) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        encode(&mut self.writer, message)?;
        Ok(())
    }

    fn poll(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        loop {
            match self.inbox.try_recv() {
                Ok(event) => {
                    let done = event == LinkEvent::Closed;
                    events.push(event);
                    if done {
                        self.closed = true;
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    events.push(LinkEvent::Closed);
                    break;
                }
            }
        }
        events
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stream.shutdown(Shutdown::Both).ok();
        }
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader thread: decode framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: Sender<LinkEvent>) {
    loop {
        match decode::<_, ServerMessage>(&mut reader) {
            Ok(message) => {
                if tx.send(LinkEvent::Message(message)).is_err() {
                    return; // Link dropped the receiver
                }
            }
            Err(e) => {
                debug!(error = %e, "relay link reader stopped");
                let _ = tx.send(LinkEvent::Closed);
                return;
            }
        }
    }
}
