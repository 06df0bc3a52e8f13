// Room directory for the relay server.
//
// `RoomDirectory` is the central data structure that `server.rs` drives. It
// maps game codes to rooms and connections to members. All mutation happens
// through methods called from the server's single-threaded main loop; there
// is no internal locking.
//
// Key responsibilities:
// - Admission: `CreateGame` opens a room (or re-attaches to an existing one),
//   `JoinGame` requires the room to exist. A member re-joining under the same
//   `member_id` replaces its stale connection, which is how clients resume
//   after a dropped link. `GameReady` is broadcast whenever a room holds two
//   or more members.
// - Forwarding: `GameData` from one member goes to every other member of the
//   same room, unchanged. The relay never looks inside the payload.
// - Liveness: every `Heartbeat` is answered with `HeartbeatAck`.
// - Departure: `PeerLeft` after a goodbye, `PeerDisconnected` after a dropped
//   link. Empty rooms are removed.
//
// Writing to client streams: members hold cloned `TcpStream` write halves
// wrapped in `BufWriter`. Write errors on one member are logged and ignored;
// that member's reader thread will see the broken pipe and report it.

use std::collections::BTreeMap;
use std::io::BufWriter;
use std::net::TcpStream;

use broadside_protocol::framing::encode;
use broadside_protocol::{GameCode, ServerMessage};
use tracing::{debug, info};

use crate::error::JoinError;

/// Relay-local handle for one accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// How a member left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Departure {
    Goodbye,
    Dropped,
}

struct Member {
    member_id: String,
    writer: BufWriter<TcpStream>,
}

#[derive(Default)]
struct RelayRoom {
    members: BTreeMap<ConnId, Member>,
}

impl RelayRoom {
    fn member_ids(&self) -> Vec<String> {
        self.members.values().map(|m| m.member_id.clone()).collect()
    }
}

pub struct RoomDirectory {
    rooms: BTreeMap<GameCode, RelayRoom>,
    connections: BTreeMap<ConnId, GameCode>,
    next_conn: u64,
    max_members: usize,
}

impl RoomDirectory {
    pub fn new(max_members: usize) -> Self {
        Self {
            rooms: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_conn: 0,
            max_members,
        }
    }

    /// Open `game_code` (or re-attach to it) and admit the creator.
    pub fn create(
        &mut self,
        game_code: GameCode,
        member_id: String,
        stream: TcpStream,
    ) -> Result<ConnId, JoinError> {
        self.rooms.entry(game_code.clone()).or_default();
        self.admit(game_code.clone(), member_id, stream, ServerMessage::GameCreated { game_code })
    }

    /// Admit a member into an existing room.
    pub fn join(
        &mut self,
        game_code: GameCode,
        member_id: String,
        stream: TcpStream,
    ) -> Result<ConnId, JoinError> {
        if !self.rooms.contains_key(&game_code) {
            return Err(JoinError::NotFound(game_code));
        }
        self.admit(game_code.clone(), member_id, stream, ServerMessage::GameJoined { game_code })
    }

    fn admit(
        &mut self,
        game_code: GameCode,
        member_id: String,
        stream: TcpStream,
        ack: ServerMessage,
    ) -> Result<ConnId, JoinError> {
        if member_id.is_empty() {
            self.drop_if_empty(&game_code);
            return Err(JoinError::EmptyMemberId);
        }
        let Some(room) = self.rooms.get_mut(&game_code) else {
            return Err(JoinError::NotFound(game_code));
        };

        // A reconnecting member replaces its own stale connection silently.
        let stale: Vec<ConnId> = room
            .members
            .iter()
            .filter(|(_, m)| m.member_id == member_id)
            .map(|(conn, _)| *conn)
            .collect();
        for conn in &stale {
            room.members.remove(conn);
            self.connections.remove(conn);
            debug!(%game_code, %member_id, conn = conn.0, "replaced stale connection");
        }

        if room.members.len() >= self.max_members {
            return Err(JoinError::Full(game_code));
        }

        let conn = ConnId(self.next_conn);
        self.next_conn += 1;
        room.members.insert(
            conn,
            Member {
                member_id: member_id.clone(),
                writer: BufWriter::new(stream),
            },
        );
        self.connections.insert(conn, game_code.clone());
        info!(%game_code, %member_id, conn = conn.0, members = room.members.len(), "member admitted");

        self.send_to(conn, &ack);
        let members = self.rooms.get(&game_code).map(RelayRoom::member_ids).unwrap_or_default();
        if members.len() >= 2 {
            let ready = ServerMessage::GameReady {
                game_code: game_code.clone(),
                members,
            };
            self.broadcast(&game_code, None, &ready);
        }
        Ok(conn)
    }

    /// Forward a room payload to every other member.
    pub fn forward(&mut self, from: ConnId, payload: serde_json::Value) {
        let Some(game_code) = self.connections.get(&from).cloned() else {
            return;
        };
        self.broadcast(&game_code, Some(from), &ServerMessage::GameData { payload });
    }

    pub fn heartbeat(&mut self, from: ConnId) {
        self.send_to(from, &ServerMessage::HeartbeatAck);
    }

    /// Reply to a connection with an error; the connection stays open.
    pub fn reject(&mut self, conn: ConnId, reason: String) {
        self.send_to(conn, &ServerMessage::Error { reason });
    }

    /// Remove a member and tell the rest of its room. No-op for connections
    /// that were already replaced or removed.
    pub fn remove(&mut self, conn: ConnId, departure: Departure) {
        let Some(game_code) = self.connections.remove(&conn) else {
            return;
        };
        let Some(member) = self.rooms.get_mut(&game_code).and_then(|r| r.members.remove(&conn)) else {
            return;
        };
        info!(%game_code, member_id = %member.member_id, ?departure, "member removed");
        let notice = match departure {
            Departure::Goodbye => ServerMessage::PeerLeft {
                member_id: member.member_id,
            },
            Departure::Dropped => ServerMessage::PeerDisconnected {
                member_id: member.member_id,
            },
        };
        self.broadcast(&game_code, None, &notice);
        self.drop_if_empty(&game_code);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, game_code: &GameCode) -> usize {
        self.rooms.get(game_code).map_or(0, |r| r.members.len())
    }

    pub fn members(&self, game_code: &GameCode) -> Vec<String> {
        self.rooms.get(game_code).map(RelayRoom::member_ids).unwrap_or_default()
    }

    fn drop_if_empty(&mut self, game_code: &GameCode) {
        if self.rooms.get(game_code).is_some_and(|r| r.members.is_empty()) {
            self.rooms.remove(game_code);
            info!(%game_code, "room closed");
        }
    }

    /// Send to one connection. Write errors are ignored (the reader thread
    /// will detect the broken pipe).
    fn send_to(&mut self, conn: ConnId, msg: &ServerMessage) {
        let Some(game_code) = self.connections.get(&conn) else {
            return;
        };
        if let Some(member) = self.rooms.get_mut(game_code).and_then(|r| r.members.get_mut(&conn)) {
            if let Err(e) = encode(&mut member.writer, msg) {
                debug!(conn = conn.0, error = %e, "write to member failed");
            }
        }
    }

    /// Send to every member of `game_code` except `skip`.
    fn broadcast(&mut self, game_code: &GameCode, skip: Option<ConnId>, msg: &ServerMessage) {
        let Some(room) = self.rooms.get_mut(game_code) else {
            return;
        };
        for (conn, member) in &mut room.members {
            if Some(*conn) == skip {
                continue;
            }
            if let Err(e) = encode(&mut member.writer, msg) {
                debug!(conn = conn.0, error = %e, "write to member failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::time::Duration;

    use broadside_protocol::framing::decode;
    use serde_json::json;

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, server)
    }

    fn recv(stream: &mut BufReader<TcpStream>) -> ServerMessage {
        decode(stream).unwrap()
    }

    fn code(s: &str) -> GameCode {
        s.parse().unwrap()
    }

    #[test]
    fn create_then_join_announces_ready() {
        let mut dir = RoomDirectory::new(8);
        let (host_client, host_server) = tcp_pair();
        let (guest_client, guest_server) = tcp_pair();

        dir.create(code("ROOM01"), "host".into(), host_server).unwrap();
        dir.join(code("ROOM01"), "guest".into(), guest_server).unwrap();
        assert_eq!(dir.member_count(&code("ROOM01")), 2);

        let mut host = BufReader::new(host_client);
        assert_eq!(
            recv(&mut host),
            ServerMessage::GameCreated {
                game_code: code("ROOM01")
            }
        );
        match recv(&mut host) {
            ServerMessage::GameReady { members, .. } => {
                assert_eq!(members, vec!["host".to_string(), "guest".to_string()]);
            }
            other => panic!("expected GameReady, got {other:?}"),
        }

        let mut guest = BufReader::new(guest_client);
        assert!(matches!(recv(&mut guest), ServerMessage::GameJoined { .. }));
        assert!(matches!(recv(&mut guest), ServerMessage::GameReady { .. }));
    }

    #[test]
    fn join_unknown_room_fails() {
        let mut dir = RoomDirectory::new(8);
        let (_client, server) = tcp_pair();
        assert_eq!(
            dir.join(code("NOPE00"), "guest".into(), server).unwrap_err(),
            JoinError::NotFound(code("NOPE00"))
        );
        assert_eq!(dir.room_count(), 0);
    }

    #[test]
    fn full_room_rejects() {
        let mut dir = RoomDirectory::new(2);
        let (_c0, s0) = tcp_pair();
        let (_c1, s1) = tcp_pair();
        let (_c2, s2) = tcp_pair();
        dir.create(code("FULL00"), "a".into(), s0).unwrap();
        dir.join(code("FULL00"), "b".into(), s1).unwrap();
        assert_eq!(
            dir.join(code("FULL00"), "c".into(), s2).unwrap_err(),
            JoinError::Full(code("FULL00"))
        );
    }

    #[test]
    fn game_data_goes_to_everyone_else() {
        let mut dir = RoomDirectory::new(8);
        let (a_client, a_server) = tcp_pair();
        let (b_client, b_server) = tcp_pair();
        let (c_client, c_server) = tcp_pair();
        let a = dir.create(code("FWD000"), "a".into(), a_server).unwrap();
        dir.join(code("FWD000"), "b".into(), b_server).unwrap();
        dir.join(code("FWD000"), "c".into(), c_server).unwrap();

        let payload = json!({"type": "attack", "row": 1, "col": 2});
        dir.forward(a, payload.clone());

        for client in [b_client, c_client] {
            let mut reader = BufReader::new(client);
            // Skip the join ack and GameReady broadcasts.
            let got = loop {
                match recv(&mut reader) {
                    ServerMessage::GameData { payload } => break payload,
                    _ => continue,
                }
            };
            assert_eq!(got, payload);
        }

        // The sender gets no echo: its next message is the heartbeat ack.
        dir.heartbeat(a);
        let mut reader = BufReader::new(a_client);
        let mut seen = Vec::new();
        loop {
            let msg = recv(&mut reader);
            let done = msg == ServerMessage::HeartbeatAck;
            seen.push(msg);
            if done {
                break;
            }
        }
        assert!(!seen.iter().any(|m| matches!(m, ServerMessage::GameData { .. })));
    }

    #[test]
    fn departure_notices_and_room_cleanup() {
        let mut dir = RoomDirectory::new(8);
        let (_a_client, a_server) = tcp_pair();
        let (b_client, b_server) = tcp_pair();
        let (_c_client, c_server) = tcp_pair();
        let a = dir.create(code("BYE000"), "a".into(), a_server).unwrap();
        let b = dir.join(code("BYE000"), "b".into(), b_server).unwrap();
        let c = dir.join(code("BYE000"), "c".into(), c_server).unwrap();

        dir.remove(a, Departure::Goodbye);
        dir.remove(c, Departure::Dropped);
        // Second removal of the same connection is a no-op.
        dir.remove(c, Departure::Dropped);

        let mut reader = BufReader::new(b_client);
        let mut notices = Vec::new();
        while notices.len() < 2 {
            match recv(&mut reader) {
                msg @ (ServerMessage::PeerLeft { .. } | ServerMessage::PeerDisconnected { .. }) => {
                    notices.push(msg);
                }
                _ => {}
            }
        }
        assert_eq!(
            notices,
            vec![
                ServerMessage::PeerLeft {
                    member_id: "a".into()
                },
                ServerMessage::PeerDisconnected {
                    member_id: "c".into()
                },
            ]
        );

        dir.remove(b, Departure::Dropped);
        assert_eq!(dir.room_count(), 0);
    }

    #[test]
    fn rejoin_replaces_stale_connection() {
        let mut dir = RoomDirectory::new(8);
        let (_h, h_server) = tcp_pair();
        let (_g1, g1_server) = tcp_pair();
        let (_g2, g2_server) = tcp_pair();
        dir.create(code("RJN000"), "host".into(), h_server).unwrap();
        let old = dir.join(code("RJN000"), "guest".into(), g1_server).unwrap();
        let new = dir.join(code("RJN000"), "guest".into(), g2_server).unwrap();
        assert_ne!(old, new);
        assert_eq!(dir.members(&code("RJN000")), vec!["host".to_string(), "guest".to_string()]);

        // The old reader thread reporting its drop must not evict the new one.
        dir.remove(old, Departure::Dropped);
        assert_eq!(dir.member_count(&code("RJN000")), 2);
    }

    #[test]
    fn create_on_existing_code_reattaches() {
        let mut dir = RoomDirectory::new(8);
        let (_h1, h1_server) = tcp_pair();
        let (_g, g_server) = tcp_pair();
        let (_h2, h2_server) = tcp_pair();
        dir.create(code("SAME00"), "host".into(), h1_server).unwrap();
        dir.join(code("SAME00"), "guest".into(), g_server).unwrap();
        dir.create(code("SAME00"), "host".into(), h2_server).unwrap();
        assert_eq!(dir.room_count(), 1);
        assert_eq!(dir.member_count(&code("SAME00")), 2);
    }

    #[test]
    fn empty_member_id_is_refused() {
        let mut dir = RoomDirectory::new(8);
        let (_c, server) = tcp_pair();
        assert_eq!(
            dir.create(code("EMPTY0"), String::new(), server).unwrap_err(),
            JoinError::EmptyMemberId
        );
        assert_eq!(dir.room_count(), 0);
    }
}
