// TCP server and main event loop for the reference relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per member): call `decode()` in a loop and send
//   `InternalEvent::MessageFrom` to the main thread. On `Goodbye` they send
//   `Disconnected { departure: Goodbye }`; on error/EOF/garbage,
//   `Disconnected { departure: Dropped }`.
// - **Main thread**: owns the `RoomDirectory`, receives events from the
//   channel, and dispatches them. The create/join handshake is read inline
//   on the main thread with a short read timeout, so admission is serialized
//   with everything else.
//
// The main thread is the only writer to member TCP streams (via the
// directory). Reader threads only read.
//
// Shutdown: the main thread checks a `keep_running` flag (cleared by
// `RelayHandle::stop`) every `POLL_INTERVAL` and breaks out of the loop.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use broadside_protocol::framing::{decode, encode};
use broadside_protocol::{ClientMessage, ServerMessage};
use tracing::{debug, info, warn};

use crate::rooms::{ConnId, Departure, RoomDirectory};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
        peer: SocketAddr,
    },
    MessageFrom {
        conn: ConnId,
        message: ClientMessage,
    },
    Disconnected {
        conn: ConnId,
        departure: Departure,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay thread exits.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub port: u16,
    pub max_members_per_room: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 7878,
            max_members_per_room: 8,
        }
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    info!(%addr, max_members = config.max_members_per_room, "relay listening");
    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let mut directory = RoomDirectory::new(config.max_members_per_room);
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream, peer });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed; listener stopping");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                handle_event(&mut directory, event, &tx, &keep_running);
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut directory, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("relay stopped");
}

/// Dispatch a single event to the directory.
fn handle_event(
    directory: &mut RoomDirectory,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream, peer } => {
            handle_new_connection(directory, stream, peer, tx, keep_running);
        }
        InternalEvent::MessageFrom { conn, message } => {
            handle_message(directory, conn, message);
        }
        InternalEvent::Disconnected { conn, departure } => {
            directory.remove(conn, departure);
        }
    }
}

/// Handle a new TCP connection: read the create/join handshake, admit the
/// member, and spawn a reader thread.
fn handle_new_connection(
    directory: &mut RoomDirectory,
    stream: TcpStream,
    peer: SocketAddr,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();
    stream.set_nodelay(true).ok();

    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let first: ClientMessage = match decode(&mut reader) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%peer, error = %e, "handshake not received");
            return;
        }
    };

    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    let admitted = match first {
        ClientMessage::CreateGame {
            game_code,
            member_id,
        } => directory.create(game_code, member_id, write_half),
        ClientMessage::JoinGame {
            game_code,
            member_id,
        } => directory.join(game_code, member_id, write_half),
        other => {
            debug!(%peer, ?other, "expected CreateGame or JoinGame; dropping connection");
            return;
        }
    };

    match admitted {
        Ok(conn) => {
            // Clear the handshake timeout for the long-lived reader loop.
            stream.set_read_timeout(None).ok();
            let tx_reader = tx.clone();
            let keep_running_reader = keep_running.clone();
            thread::spawn(move || {
                reader_loop(reader, conn, tx_reader, keep_running_reader);
            });
        }
        Err(e) => {
            info!(%peer, reason = %e, "admission refused");
            let rejected = ServerMessage::Error {
                reason: e.to_string(),
            };
            let mut writer = BufWriter::new(stream);
            let _ = encode(&mut writer, &rejected);
        }
    }
}

/// Reader loop for a single member. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    conn: ConnId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match decode::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => {
                let _ = tx.send(InternalEvent::Disconnected {
                    conn,
                    departure: Departure::Goodbye,
                });
                break;
            }
            Ok(message) => {
                let _ = tx.send(InternalEvent::MessageFrom { conn, message });
            }
            Err(_) => {
                // EOF, read error, or malformed frame.
                let _ = tx.send(InternalEvent::Disconnected {
                    conn,
                    departure: Departure::Dropped,
                });
                break;
            }
        }
    }
}

/// Handle a post-handshake message.
fn handle_message(directory: &mut RoomDirectory, conn: ConnId, message: ClientMessage) {
    match message {
        ClientMessage::GameData { payload } => directory.forward(conn, payload),
        ClientMessage::Heartbeat => directory.heartbeat(conn),
        ClientMessage::CreateGame { .. } | ClientMessage::JoinGame { .. } => {
            directory.reject(conn, "already in a game".into());
        }
        ClientMessage::Goodbye => {
            // Handled in the reader loop.
        }
    }
}
