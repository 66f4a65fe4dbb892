use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tokio::sync::broadcast;

use crate::errors::SessionResult;
use crate::manager::{CommandOutcome, RoomManager, SharedRoom};
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::Seat;

/// WebSocket layer: binds connections to seats, feeds commands into the
/// room's sequencer and fans accepted snapshots out to every connected seat.
/// Pure infrastructure — all rules live behind the room lock.
#[derive(Clone)]
pub struct WebSocketService {
    rooms: Arc<RoomManager>,
    broadcaster: broadcast::Sender<(String, ServerMessage)>,
}

/// Per-connection identity: which seat in which room, if any.
#[derive(Default)]
struct ConnState {
    name: String,
    room_code: Option<String>,
    seat: Option<Seat>,
}

impl Default for WebSocketService {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketService {
    pub fn new() -> Self {
        let (broadcaster, _) = broadcast::channel(1000);
        Self {
            rooms: Arc::new(RoomManager::new()),
            broadcaster,
        }
    }

    pub fn room_manager(&self) -> Arc<RoomManager> {
        self.rooms.clone()
    }

    fn broadcast(&self, room_code: &str, msg: ServerMessage) {
        // Send errors only mean no subscriber is listening right now.
        let _ = self.broadcaster.send((room_code.to_string(), msg));
    }

    pub async fn handle_connection(&self, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();
        let mut updates = self.broadcaster.subscribe();
        let mut conn = ConnState::default();

        log::info!("🔌 WebSocket connected");

        loop {
            tokio::select! {
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let replies = self.handle_text(&mut conn, text.to_string()).await;
                            for reply in replies {
                                if send_message(&mut sender, &reply).await.is_err() {
                                    return self.finish(conn).await;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::debug!("WebSocket receive error: {}", e);
                            break;
                        }
                    }
                }
                update = updates.recv() => {
                    match update {
                        Ok((room_code, msg)) => {
                            if conn.room_code.as_deref() == Some(room_code.as_str())
                                && send_message(&mut sender, &msg).await.is_err()
                            {
                                return self.finish(conn).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Snapshots are total: resynchronize from the
                            // latest one instead of replaying history.
                            log::warn!("Connection lagged {} updates, resyncing", skipped);
                            if let Some(code) = conn.room_code.clone() {
                                for msg in self.resync_messages(&code).await {
                                    if send_message(&mut sender, &msg).await.is_err() {
                                        return self.finish(conn).await;
                                    }
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        self.finish(conn).await;
    }

    /// Mark the seat disconnected and tell the room. Match state persists;
    /// the seat resumes via its reconnect token.
    async fn finish(&self, conn: ConnState) {
        let (Some(code), Some(seat)) = (conn.room_code, conn.seat) else {
            return;
        };
        if let Ok(room) = self.rooms.get_room(&code).await {
            let msg = {
                let mut room = room.lock().await;
                room.mark_disconnected(seat);
                ServerMessage::room_state(&room)
            };
            self.broadcast(&code, msg);
        }
        log::info!("🔌 Seat {} disconnected from room {}", seat, code);
    }

    async fn resync_messages(&self, room_code: &str) -> Vec<ServerMessage> {
        match self.rooms.get_room(room_code).await {
            Ok(room) => {
                let room = room.lock().await;
                let mut msgs = vec![ServerMessage::room_state(&room)];
                msgs.extend(ServerMessage::match_state(&room));
                msgs
            }
            Err(_) => Vec::new(),
        }
    }

    /// Handle one client message. Returns the direct replies; room-wide
    /// effects go through the broadcaster (which also reaches this
    /// connection's subscription).
    async fn handle_text(&self, conn: &mut ConnState, text: String) -> Vec<ServerMessage> {
        let msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Bad client message: {} ({})", text, e);
                return vec![ServerMessage::error("invalid", format!("Invalid message: {e}"))];
            }
        };

        match msg {
            ClientMessage::Hello { name, version } => {
                if let Some(v) = version {
                    if v != PROTOCOL_VERSION {
                        return vec![ServerMessage::error("invalid", "Unsupported version")];
                    }
                }
                conn.name = name;
                vec![ServerMessage::Hello {
                    version: PROTOCOL_VERSION,
                }]
            }

            ClientMessage::CreateRoom {
                name, max_seats, ..
            } => {
                if !(2..=6).contains(&max_seats) {
                    return vec![ServerMessage::error("invalid", "max_seats must be 2..=6")];
                }
                let room = self.rooms.create_room(name, max_seats).await;
                let mut room = room.lock().await;
                conn.room_code = Some(room.room_code.clone());
                conn.seat = Some(room.host_seat);
                let host_seat = room.host_seat;
                let token = room.mint_token(host_seat);
                vec![
                    ServerMessage::room_state(&room),
                    ServerMessage::ReconnectToken {
                        room_code: room.room_code.clone(),
                        seat: room.host_seat,
                        token,
                        last_seq_applied: -1,
                    },
                ]
            }

            ClientMessage::JoinRoom { room_code, name } => {
                let room = match self.rooms.get_room(&room_code).await {
                    Ok(room) => room,
                    Err(e) => return vec![ServerMessage::from(&e)],
                };
                let mut room = room.lock().await;
                let seat = match room.join(&name) {
                    Ok(seat) => seat,
                    Err(e) => return vec![ServerMessage::from(&e)],
                };
                conn.room_code = Some(room_code.clone());
                conn.seat = Some(seat);
                let token = room.mint_token(seat);

                self.broadcast(&room_code, ServerMessage::room_state(&room));
                let mut replies = vec![ServerMessage::ReconnectToken {
                    room_code: room_code.clone(),
                    seat,
                    token,
                    last_seq_applied: room.last_seq_applied(seat),
                }];
                replies.extend(ServerMessage::match_state(&room));
                replies
            }

            ClientMessage::Reconnect { room_code, token } => {
                let room = match self.rooms.get_room(&room_code).await {
                    Ok(room) => room,
                    Err(e) => return vec![ServerMessage::from(&e)],
                };
                let mut room = room.lock().await;
                let seat = match room.reconnect(&token) {
                    Ok(seat) => seat,
                    Err(e) => return vec![ServerMessage::from(&e)],
                };
                conn.room_code = Some(room_code.clone());
                conn.seat = Some(seat);

                self.broadcast(&room_code, ServerMessage::room_state(&room));
                let mut replies = vec![ServerMessage::ReconnectToken {
                    room_code: room_code.clone(),
                    seat,
                    token,
                    last_seq_applied: room.last_seq_applied(seat),
                }];
                replies.extend(ServerMessage::match_state(&room));
                replies
            }

            ClientMessage::LeaveRoom => {
                if let (Some(code), Some(seat)) = (conn.room_code.take(), conn.seat.take()) {
                    if let Ok(room) = self.rooms.get_room(&code).await {
                        let msg = {
                            let mut room = room.lock().await;
                            room.mark_disconnected(seat);
                            ServerMessage::room_state(&room)
                        };
                        self.broadcast(&code, msg);
                    }
                }
                Vec::new()
            }

            ClientMessage::SetMap { map_id, inline_map } => {
                self.with_room(conn, |room, seat| {
                    room.set_map(seat, map_id, inline_map.map(|b| *b))?;
                    Ok(vec![RoomEffect::Broadcast(ServerMessage::room_state(room))])
                })
                .await
            }

            ClientMessage::StartMatch | ClientMessage::Rematch => {
                let seed: u64 = rand::random();
                self.with_room(conn, |room, seat| {
                    room.start_match(seat, seed)?;
                    let mut effects = vec![RoomEffect::Broadcast(ServerMessage::room_state(room))];
                    effects.extend(
                        ServerMessage::match_state(room).map(RoomEffect::Broadcast),
                    );
                    Ok(effects)
                })
                .await
            }

            ClientMessage::Cmd {
                match_id,
                seq,
                cmd_id,
                command,
            } => {
                self.with_room(conn, |room, seat| {
                    let outcome = room.submit_command(seat, match_id, seq, &cmd_id, &command)?;
                    let mut effects = Vec::new();
                    match outcome {
                        CommandOutcome::OutOfOrder(err) => {
                            effects.push(RoomEffect::Reply(ServerMessage::from(&err)));
                        }
                        CommandOutcome::Accepted(submission) => {
                            let broadcast_snapshot =
                                submission.ack.applied && !submission.ack.duplicate;
                            effects.push(RoomEffect::Reply(ServerMessage::CmdAck {
                                ack: submission.ack,
                            }));
                            if let Some(rejection) = &submission.rejection {
                                effects.push(RoomEffect::Reply(ServerMessage::from(rejection)));
                            }
                            if broadcast_snapshot {
                                effects.extend(
                                    ServerMessage::match_state(room).map(RoomEffect::Broadcast),
                                );
                            }
                        }
                    }
                    Ok(effects)
                })
                .await
            }

            ClientMessage::LegalMoves => {
                self.with_room(conn, |room, seat| {
                    let current = room
                        .current
                        .as_ref()
                        .ok_or(crate::errors::SessionError::NoMatch)?;
                    let moves = crate::legal::legal_moves(&current.game, seat);
                    Ok(vec![RoomEffect::Reply(ServerMessage::LegalMoves {
                        seat,
                        moves,
                    })])
                })
                .await
            }
        }
    }

    /// Run a closure against the connection's room under its lock, turning
    /// session errors into error replies and splitting effects into direct
    /// replies vs. room-wide broadcasts.
    async fn with_room<F>(&self, conn: &ConnState, f: F) -> Vec<ServerMessage>
    where
        F: FnOnce(&mut crate::manager::Room, Seat) -> SessionResult<Vec<RoomEffect>>,
    {
        let (Some(code), Some(seat)) = (conn.room_code.as_ref(), conn.seat) else {
            return vec![ServerMessage::error("unknown_room", "Join a room first")];
        };
        let room: SharedRoom = match self.rooms.get_room(code).await {
            Ok(room) => room,
            Err(e) => return vec![ServerMessage::from(&e)],
        };
        let effects = {
            let mut room = room.lock().await;
            match f(&mut room, seat) {
                Ok(effects) => effects,
                Err(e) => return vec![ServerMessage::from(&e)],
            }
        };

        let mut replies = Vec::new();
        for effect in effects {
            match effect {
                RoomEffect::Reply(msg) => replies.push(msg),
                RoomEffect::Broadcast(msg) => self.broadcast(code, msg),
            }
        }
        replies
    }
}

enum RoomEffect {
    Reply(ServerMessage),
    Broadcast(ServerMessage),
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::legal::legal_settlement_nodes;

    fn conn_in(code: &str, seat: Seat) -> ConnState {
        ConnState {
            name: format!("seat-{seat}"),
            room_code: Some(code.to_string()),
            seat: Some(seat),
        }
    }

    async fn started_room(service: &WebSocketService) -> (String, SharedRoom) {
        let room = service.rooms.create_room("Alice".into(), 2).await;
        let code = {
            let mut locked = room.lock().await;
            locked.join("Bob").unwrap();
            locked.start_match(0, 7).unwrap();
            locked.room_code.clone()
        };
        (code, room)
    }

    #[tokio::test]
    async fn hello_reports_protocol_version() {
        let service = WebSocketService::new();
        let mut conn = ConnState::default();
        let replies = service
            .handle_text(&mut conn, r#"{"type":"hello","name":"Alice"}"#.into())
            .await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Hello { version }] if *version == PROTOCOL_VERSION
        ));
        assert_eq!(conn.name, "Alice");
    }

    #[tokio::test]
    async fn create_room_binds_seat_and_mints_token() {
        let service = WebSocketService::new();
        let mut conn = ConnState::default();
        let replies = service
            .handle_text(
                &mut conn,
                r#"{"type":"create_room","name":"Alice","max_seats":2}"#.into(),
            )
            .await;

        assert_eq!(conn.seat, Some(0));
        assert!(conn.room_code.is_some());
        assert!(matches!(replies[0], ServerMessage::RoomState { .. }));
        let ServerMessage::ReconnectToken {
            seat,
            last_seq_applied,
            ref token,
            ..
        } = replies[1]
        else {
            panic!("expected reconnect_token");
        };
        assert_eq!(seat, 0);
        assert_eq!(last_seq_applied, -1);
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn join_unknown_room_errors() {
        let service = WebSocketService::new();
        let mut conn = ConnState::default();
        let replies = service
            .handle_text(
                &mut conn,
                r#"{"type":"join_room","room_code":"ZZZZZZ","name":"Bob"}"#.into(),
            )
            .await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Error { ref code, .. }] if code == "unknown_room"
        ));
    }

    #[tokio::test]
    async fn guest_cannot_start_match() {
        let service = WebSocketService::new();
        let (code, _room) = {
            let room = service.rooms.create_room("Alice".into(), 2).await;
            let code = {
                let mut locked = room.lock().await;
                locked.join("Bob").unwrap();
                locked.room_code.clone()
            };
            (code, room)
        };

        let mut conn = conn_in(&code, 1);
        let replies = service
            .handle_text(&mut conn, r#"{"type":"start_match"}"#.into())
            .await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Error { ref code, .. }] if code == "not_host"
        ));
    }

    #[tokio::test]
    async fn cmd_flow_acks_and_reports_sequence_errors() {
        let service = WebSocketService::new();
        let (code, room) = started_room(&service).await;
        let mut conn = conn_in(&code, 0);

        let node = {
            let locked = room.lock().await;
            legal_settlement_nodes(&locked.current.as_ref().unwrap().game, 0, false)[0]
        };
        let cmd = serde_json::to_string(&ClientMessage::Cmd {
            match_id: 1,
            seq: 5,
            cmd_id: "c1".into(),
            command: Command::PlaceSettlement { node },
        })
        .unwrap();

        // Out of order: expected 0.
        let replies = service.handle_text(&mut conn, cmd).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Error { ref code, ref detail, .. }]
                if code == "out_of_order" && detail["expected_seq"] == 0
        ));

        // In order: applied ack.
        let cmd = serde_json::to_string(&ClientMessage::Cmd {
            match_id: 1,
            seq: 0,
            cmd_id: "c1".into(),
            command: Command::PlaceSettlement { node },
        })
        .unwrap();
        let replies = service.handle_text(&mut conn, cmd.clone()).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::CmdAck { ack }] if ack.applied && !ack.duplicate
        ));

        // Retransmission: duplicate ack, no second application.
        let replies = service.handle_text(&mut conn, cmd).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::CmdAck { ack }] if ack.duplicate
        ));
        assert_eq!(room.lock().await.current.as_ref().unwrap().tick, 1);
    }

    #[tokio::test]
    async fn rejected_command_returns_ack_and_error() {
        let service = WebSocketService::new();
        let (code, _room) = started_room(&service).await;
        // Seat 1 tries to act during seat 0's setup visit.
        let mut conn = conn_in(&code, 1);

        let cmd = serde_json::to_string(&ClientMessage::Cmd {
            match_id: 1,
            seq: 0,
            cmd_id: "x".into(),
            command: Command::EndTurn,
        })
        .unwrap();
        let replies = service.handle_text(&mut conn, cmd).await;
        assert_eq!(replies.len(), 2);
        assert!(matches!(
            &replies[0],
            ServerMessage::CmdAck { ack } if !ack.applied
        ));
        assert!(matches!(
            &replies[1],
            ServerMessage::Error { code, .. } if code == "wrong_phase" || code == "not_your_turn"
        ));
    }

    #[tokio::test]
    async fn reconnect_reports_last_applied_and_snapshot() {
        let service = WebSocketService::new();
        let (code, room) = started_room(&service).await;

        // Seat 0 plays one command, then drops.
        let mut conn = conn_in(&code, 0);
        let token = {
            let mut locked = room.lock().await;
            locked.mint_token(0)
        };
        let node = {
            let locked = room.lock().await;
            legal_settlement_nodes(&locked.current.as_ref().unwrap().game, 0, false)[0]
        };
        let cmd = serde_json::to_string(&ClientMessage::Cmd {
            match_id: 1,
            seq: 0,
            cmd_id: "c1".into(),
            command: Command::PlaceSettlement { node },
        })
        .unwrap();
        service.handle_text(&mut conn, cmd).await;
        room.lock().await.mark_disconnected(0);

        // Fresh connection resumes the seat from the token.
        let mut fresh = ConnState::default();
        let reconnect = format!(
            r#"{{"type":"reconnect","room_code":"{}","token":"{}"}}"#,
            code, token
        );
        let replies = service.handle_text(&mut fresh, reconnect).await;
        assert_eq!(fresh.seat, Some(0));

        let ServerMessage::ReconnectToken {
            last_seq_applied, ..
        } = &replies[0]
        else {
            panic!("expected reconnect_token");
        };
        assert_eq!(*last_seq_applied, 0);
        assert!(matches!(&replies[1], ServerMessage::MatchState { tick: 1, .. }));

        // Invalid token loses the seat, full stop.
        let mut other = ConnState::default();
        let bad = format!(
            r#"{{"type":"reconnect","room_code":"{}","token":"nope"}}"#,
            code
        );
        let replies = service.handle_text(&mut other, bad).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Error { ref code, .. }] if code == "invalid_token"
        ));
    }

    #[tokio::test]
    async fn snapshot_after_reconnect_matches_uninterrupted_view() {
        let service = WebSocketService::new();
        let (code, room) = started_room(&service).await;
        let mut conn = conn_in(&code, 0);

        let node = {
            let locked = room.lock().await;
            legal_settlement_nodes(&locked.current.as_ref().unwrap().game, 0, false)[0]
        };
        let cmd = serde_json::to_string(&ClientMessage::Cmd {
            match_id: 1,
            seq: 0,
            cmd_id: "c1".into(),
            command: Command::PlaceSettlement { node },
        })
        .unwrap();
        service.handle_text(&mut conn, cmd).await;

        // The snapshot an uninterrupted seat would see.
        let direct = {
            let locked = room.lock().await;
            serde_json::to_string(&ServerMessage::match_state(&locked).unwrap()).unwrap()
        };

        // The snapshot a reconnecting seat receives.
        let token = room.lock().await.mint_token(0);
        let mut fresh = ConnState::default();
        let reconnect = format!(
            r#"{{"type":"reconnect","room_code":"{}","token":"{}"}}"#,
            code, token
        );
        let replies = service.handle_text(&mut fresh, reconnect).await;
        let via_reconnect = serde_json::to_string(&replies[1]).unwrap();

        assert_eq!(direct, via_reconnect);
    }

    #[tokio::test]
    async fn legal_moves_requires_running_match() {
        let service = WebSocketService::new();
        let room = service.rooms.create_room("Alice".into(), 2).await;
        let code = room.lock().await.room_code.clone();

        let mut conn = conn_in(&code, 0);
        let replies = service
            .handle_text(&mut conn, r#"{"type":"legal_moves"}"#.into())
            .await;
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::Error { ref code, .. }] if code == "no_match"
        ));
    }
}
