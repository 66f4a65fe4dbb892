use serde::{Deserialize, Serialize};

use crate::commands::Command;
use crate::errors::{RuleError, SessionError};
use crate::legal::LegalMoves;
use crate::manager::{Room, RoomStatus, SeatSlot};
use crate::map::{list_presets, MapDescription, PresetMeta, RulesConfig};
use crate::sequencer::{CommandAck, OutOfOrder};
use crate::state::{GameState, Seat};

pub const PROTOCOL_VERSION: u32 = 1;

fn default_max_seats() -> u8 {
    4
}

/// Client → server messages over the persistent WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u32>,
    },
    CreateRoom {
        name: String,
        #[serde(default = "default_max_seats")]
        max_seats: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ruleset: Option<serde_json::Value>,
    },
    JoinRoom {
        room_code: String,
        name: String,
    },
    LeaveRoom,
    SetMap {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inline_map: Option<Box<MapDescription>>,
    },
    StartMatch,
    Rematch,
    Reconnect {
        room_code: String,
        token: String,
    },
    Cmd {
        match_id: u32,
        seq: u64,
        cmd_id: String,
        command: Command,
    },
    LegalMoves,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatInfo {
    pub seat: Seat,
    pub name: String,
    pub connected: bool,
}

impl From<&SeatSlot> for SeatInfo {
    fn from(slot: &SeatSlot) -> Self {
        SeatInfo {
            seat: slot.seat,
            name: slot.name.clone(),
            connected: slot.connected,
        }
    }
}

/// Server → client messages. `MatchState` is the full versioned snapshot; a
/// reconnecting client resumes from the latest one plus its
/// `last_seq_applied`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        version: u32,
    },
    RoomState {
        room_code: String,
        host_seat: Seat,
        seats: Vec<SeatInfo>,
        max_seats: u8,
        status: RoomStatus,
        map_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        map_meta: Option<PresetMeta>,
        map_presets: Vec<PresetMeta>,
        map_rules: RulesConfig,
    },
    MatchState {
        room_code: String,
        match_id: u32,
        tick: u64,
        seed: u64,
        state: Box<GameState>,
    },
    ReconnectToken {
        room_code: String,
        seat: Seat,
        token: String,
        last_seq_applied: i64,
    },
    CmdAck {
        #[serde(flatten)]
        ack: CommandAck,
    },
    LegalMoves {
        seat: Seat,
        moves: LegalMoves,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        detail: serde_json::Value,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn error_with_detail(
        code: impl Into<String>,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            detail,
        }
    }

    /// The lobby view broadcast whenever seats, map choice or status change.
    pub fn room_state(room: &Room) -> Self {
        let map_meta = if room.map_id == "custom" {
            room.inline_map.as_ref().map(|desc| PresetMeta {
                id: "custom".to_string(),
                name: desc.name.clone().unwrap_or_else(|| "Custom map".to_string()),
                description: "Host-uploaded map description".to_string(),
            })
        } else {
            list_presets().into_iter().find(|p| p.id == room.map_id)
        };
        let map_rules = match &room.inline_map {
            Some(desc) => desc.rules.clone(),
            None => crate::map::get_preset(&room.map_id)
                .map(|d| d.rules)
                .unwrap_or_default(),
        };

        ServerMessage::RoomState {
            room_code: room.room_code.clone(),
            host_seat: room.host_seat,
            seats: room.seats.iter().map(SeatInfo::from).collect(),
            max_seats: room.max_seats,
            status: room.status,
            map_id: room.map_id.clone(),
            map_meta,
            map_presets: list_presets(),
            map_rules,
        }
    }

    /// The full snapshot for the room's current match, if one is running.
    pub fn match_state(room: &Room) -> Option<Self> {
        room.current.as_ref().map(|m| ServerMessage::MatchState {
            room_code: room.room_code.clone(),
            match_id: m.match_id,
            tick: m.tick,
            seed: m.seed,
            state: Box::new(m.game.clone()),
        })
    }
}

impl From<&RuleError> for ServerMessage {
    fn from(err: &RuleError) -> Self {
        ServerMessage::Error {
            code: err.kind.code().to_string(),
            message: err.message.clone(),
            detail: err.detail.clone().unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        ServerMessage::error(err.code(), err.to_string())
    }
}

impl From<&OutOfOrder> for ServerMessage {
    fn from(err: &OutOfOrder) -> Self {
        ServerMessage::error_with_detail(
            "out_of_order",
            "Command out of order",
            serde_json::json!({ "expected_seq": err.expected_seq }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_wire_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"hello","name":"Alice","version":1}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Hello { ref name, .. } if name == "Alice"));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"cmd","match_id":1,"seq":0,"cmd_id":"abc","command":{"type":"roll"}}"#,
        )
        .unwrap();
        let ClientMessage::Cmd {
            match_id,
            seq,
            cmd_id,
            command,
        } = msg
        else {
            panic!("expected cmd");
        };
        assert_eq!((match_id, seq, cmd_id.as_str()), (1, 0, "abc"));
        assert_eq!(command, Command::Roll { roll: None });
    }

    #[test]
    fn create_room_defaults_max_seats() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"create_room","name":"Alice"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CreateRoom { max_seats: 4, .. }));
    }

    #[test]
    fn out_of_order_error_carries_expected_seq() {
        let msg = ServerMessage::from(&OutOfOrder { expected_seq: 3 });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "out_of_order");
        assert_eq!(json["detail"]["expected_seq"], 3);
    }

    #[test]
    fn cmd_ack_flattens_fields() {
        let msg = ServerMessage::CmdAck {
            ack: CommandAck {
                cmd_id: "abc".into(),
                seq: 2,
                last_seq_applied: 2,
                applied: true,
                duplicate: false,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cmd_ack");
        assert_eq!(json["cmd_id"], "abc");
        assert_eq!(json["seq"], 2);
        assert_eq!(json["last_seq_applied"], 2);
        assert_eq!(json["applied"], true);
        assert_eq!(json["duplicate"], false);
    }

    #[test]
    fn room_state_lists_presets_and_rules() {
        let room = Room::new("ABC123".into(), "Alice".into(), 3);
        let msg = ServerMessage::room_state(&room);
        let ServerMessage::RoomState {
            map_id,
            map_presets,
            map_rules,
            seats,
            ..
        } = msg
        else {
            panic!("expected room_state");
        };
        assert_eq!(map_id, "base_standard");
        assert_eq!(map_presets.len(), 7);
        assert_eq!(map_rules.target_vp, 10);
        assert_eq!(seats.len(), 3);
    }
}
