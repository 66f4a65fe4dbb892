use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::commands::Command;
use crate::errors::{SessionError, SessionResult};
use crate::map::{get_preset, resolve_map, MapDescription, DEFAULT_PRESET_ID, DEFAULT_TILE_SIZE};
use crate::sequencer::{CommandSequencer, OutOfOrder, Submission};
use crate::state::{GameState, Seat};

const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatSlot {
    pub seat: Seat,
    pub name: String,
    pub connected: bool,
}

impl SeatSlot {
    fn is_claimed(&self) -> bool {
        !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Lobby,
    InMatch,
}

/// A running match: the engine state plus its sequencing bookkeeping. The
/// room's lock makes this the per-match serialization point.
#[derive(Debug)]
pub struct MatchRuntime {
    pub match_id: u32,
    pub tick: u64,
    pub seed: u64,
    pub game: GameState,
    pub sequencer: CommandSequencer,
}

/// Result of routing a command through a room's sequencer.
#[derive(Debug)]
pub enum CommandOutcome {
    Accepted(Submission),
    OutOfOrder(OutOfOrder),
}

/// A pre-match lobby and (once started) its active match. The first joining
/// identity holds the host seat; map choice, start and rematch are host-only.
#[derive(Debug)]
pub struct Room {
    pub room_code: String,
    pub max_seats: u8,
    pub host_seat: Seat,
    pub seats: Vec<SeatSlot>,
    pub status: RoomStatus,
    pub map_id: String,
    pub inline_map: Option<MapDescription>,
    pub current: Option<MatchRuntime>,
    reconnect_tokens: HashMap<String, Seat>,
}

impl Room {
    pub fn new(room_code: String, host_name: String, max_seats: u8) -> Self {
        let mut seats: Vec<SeatSlot> = (0..max_seats)
            .map(|i| SeatSlot {
                seat: i,
                name: String::new(),
                connected: false,
            })
            .collect();
        seats[0].name = host_name;
        seats[0].connected = true;

        Room {
            room_code,
            max_seats,
            host_seat: 0,
            seats,
            status: RoomStatus::Lobby,
            map_id: DEFAULT_PRESET_ID.to_string(),
            inline_map: None,
            current: None,
            reconnect_tokens: HashMap::new(),
        }
    }

    /// Claim a seat for `name`: the seat already carrying that name (a plain
    /// rejoin), or the first free one.
    pub fn join(&mut self, name: &str) -> SessionResult<Seat> {
        if let Some(slot) = self.seats.iter_mut().find(|s| s.name == name) {
            slot.connected = true;
            return Ok(slot.seat);
        }
        match self.seats.iter_mut().find(|s| !s.is_claimed()) {
            Some(slot) => {
                slot.name = name.to_string();
                slot.connected = true;
                Ok(slot.seat)
            }
            None => Err(SessionError::RoomFull {
                room_code: self.room_code.clone(),
            }),
        }
    }

    /// Mint the opaque reconnect token bound to (room, seat). Issued once
    /// per successful join.
    pub fn mint_token(&mut self, seat: Seat) -> String {
        let token = Uuid::new_v4().to_string();
        self.reconnect_tokens.insert(token.clone(), seat);
        token
    }

    /// Rebind a dropped seat from its token. Counters and match state are
    /// untouched; the caller reports `last_seq_applied` so the client can
    /// replay its pending queue.
    pub fn reconnect(&mut self, token: &str) -> SessionResult<Seat> {
        let seat = *self
            .reconnect_tokens
            .get(token)
            .ok_or(SessionError::InvalidToken)?;
        self.seats[seat as usize].connected = true;
        Ok(seat)
    }

    pub fn mark_disconnected(&mut self, seat: Seat) {
        if let Some(slot) = self.seats.get_mut(seat as usize) {
            slot.connected = false;
        }
    }

    fn require_host(&self, seat: Seat) -> SessionResult<()> {
        if seat != self.host_seat {
            return Err(SessionError::NotHost);
        }
        Ok(())
    }

    /// Host-only: pick a preset or supply an inline description. Takes
    /// effect at the next start/rematch.
    pub fn set_map(
        &mut self,
        seat: Seat,
        map_id: Option<String>,
        inline_map: Option<MapDescription>,
    ) -> SessionResult<()> {
        self.require_host(seat)?;
        match (map_id, inline_map) {
            (Some(id), None) => {
                if get_preset(&id).is_none() {
                    return Err(SessionError::Map(crate::errors::MapError::with_detail(
                        "unknown preset",
                        serde_json::json!({ "map_id": id }),
                    )));
                }
                self.map_id = id;
                self.inline_map = None;
            }
            (None, Some(desc)) => {
                self.map_id = "custom".to_string();
                self.inline_map = Some(desc);
            }
            _ => {
                return Err(SessionError::Map(crate::errors::MapError::new(
                    "exactly one of map_id / inline_map required",
                )))
            }
        }
        Ok(())
    }

    fn chosen_description(&self) -> SessionResult<MapDescription> {
        match &self.inline_map {
            Some(desc) => Ok(desc.clone()),
            None => get_preset(&self.map_id).ok_or_else(|| {
                SessionError::Map(crate::errors::MapError::with_detail(
                    "unknown preset",
                    serde_json::json!({ "map_id": self.map_id }),
                ))
            }),
        }
    }

    /// Host-only. Resolves the chosen map and spins up a fresh match; any
    /// resolution failure aborts before a match is exposed. Also serves as
    /// rematch: same seats and map choice, fresh seed and shuffles.
    pub fn start_match(&mut self, seat: Seat, seed: u64) -> SessionResult<&MatchRuntime> {
        self.require_host(seat)?;
        if self.seats.iter().filter(|s| s.is_claimed()).count() < 2 {
            return Err(SessionError::NotEnoughPlayers);
        }

        let desc = self.chosen_description()?;
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let resolved = resolve_map(&desc, &self.map_id, &mut rng, DEFAULT_TILE_SIZE)
            .map_err(SessionError::Map)?;

        let names: Vec<String> = self
            .seats
            .iter()
            .map(|s| {
                if s.is_claimed() {
                    s.name.clone()
                } else {
                    format!("Seat {}", s.seat + 1)
                }
            })
            .collect();
        let game = GameState::new(resolved, names, seed);
        let sequencer = CommandSequencer::new(self.max_seats);

        let match_id = self.current.as_ref().map(|m| m.match_id + 1).unwrap_or(1);
        self.current = Some(MatchRuntime {
            match_id,
            tick: 0,
            seed,
            game,
            sequencer,
        });
        self.status = RoomStatus::InMatch;
        log::info!(
            "🎮 Room {} started match {} (seed {})",
            self.room_code,
            match_id,
            seed
        );
        Ok(self.current.as_ref().expect("just set"))
    }

    /// Route one command through the sequencer. Applied commands bump the
    /// snapshot tick.
    pub fn submit_command(
        &mut self,
        seat: Seat,
        match_id: u32,
        seq: u64,
        cmd_id: &str,
        cmd: &Command,
    ) -> SessionResult<CommandOutcome> {
        let current = self.current.as_mut().ok_or(SessionError::NoMatch)?;
        if current.match_id != match_id {
            return Err(SessionError::MatchIdMismatch);
        }

        match current
            .sequencer
            .submit(&mut current.game, seat, seq, cmd_id, cmd)
        {
            Ok(submission) => {
                if submission.ack.applied && !submission.ack.duplicate {
                    current.tick += 1;
                }
                Ok(CommandOutcome::Accepted(submission))
            }
            Err(out_of_order) => Ok(CommandOutcome::OutOfOrder(out_of_order)),
        }
    }

    pub fn last_seq_applied(&self, seat: Seat) -> i64 {
        self.current
            .as_ref()
            .map(|m| m.sequencer.last_seq_applied(seat))
            .unwrap_or(-1)
    }
}

pub type SharedRoom = Arc<Mutex<Room>>;

/// Owns every room. Room lookup is the only shared map; all match state
/// lives behind each room's own lock, so independent matches never contend.
#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<String, SharedRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn gen_code(taken: &HashMap<String, SharedRoom>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| *ROOM_CODE_ALPHABET.choose(&mut rng).unwrap() as char)
                .collect();
            if !taken.contains_key(&code) {
                return code;
            }
        }
    }

    pub async fn create_room(&self, host_name: String, max_seats: u8) -> SharedRoom {
        let mut rooms = self.rooms.write().await;
        let code = Self::gen_code(&rooms);
        let room = Arc::new(Mutex::new(Room::new(code.clone(), host_name, max_seats)));
        rooms.insert(code.clone(), room.clone());
        log::info!("🏠 Created room {}", code);
        room
    }

    pub async fn get_room(&self, room_code: &str) -> SessionResult<SharedRoom> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_code)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRoom {
                room_code: room_code.to_string(),
            })
    }

    pub async fn remove_room(&self, room_code: &str) {
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_code);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::state::Phase;

    fn lobby() -> Room {
        let mut room = Room::new("ABC123".into(), "Alice".into(), 4);
        room.join("Bob").unwrap();
        room
    }

    #[test]
    fn first_identity_is_host() {
        let room = Room::new("ABC123".into(), "Alice".into(), 4);
        assert_eq!(room.host_seat, 0);
        assert_eq!(room.seats[0].name, "Alice");
        assert!(room.seats[0].connected);
        assert_eq!(room.status, RoomStatus::Lobby);
    }

    #[test]
    fn join_fills_seats_then_rejects() {
        let mut room = Room::new("ABC123".into(), "Alice".into(), 2);
        assert_eq!(room.join("Bob").unwrap(), 1);
        let err = room.join("Carol").unwrap_err();
        assert!(matches!(err, SessionError::RoomFull { .. }));

        // Rejoining by name reclaims the same seat.
        room.mark_disconnected(1);
        assert_eq!(room.join("Bob").unwrap(), 1);
        assert!(room.seats[1].connected);
    }

    #[test]
    fn host_only_commands_rejected_for_guests() {
        let mut room = lobby();
        assert!(matches!(
            room.set_map(1, Some("base_12vp".into()), None),
            Err(SessionError::NotHost)
        ));
        assert!(matches!(
            room.start_match(1, 7),
            Err(SessionError::NotHost)
        ));
    }

    #[test]
    fn start_needs_two_claimed_seats() {
        let mut room = Room::new("ABC123".into(), "Alice".into(), 4);
        assert!(matches!(
            room.start_match(0, 7),
            Err(SessionError::NotEnoughPlayers)
        ));
        room.join("Bob").unwrap();
        assert!(room.start_match(0, 7).is_ok());
        assert_eq!(room.status, RoomStatus::InMatch);
    }

    #[test]
    fn start_resolves_chosen_map() {
        let mut room = lobby();
        room.set_map(0, Some("base_12vp".into()), None).unwrap();
        room.start_match(0, 7).unwrap();

        let current = room.current.as_ref().unwrap();
        assert_eq!(current.match_id, 1);
        assert_eq!(current.game.map.rules.target_vp, 12);
        assert_eq!(current.game.players[0].name, "Alice");
        assert_eq!(current.game.players[1].name, "Bob");
        assert_eq!(current.game.phase, Phase::Setup);
    }

    #[test]
    fn unknown_preset_rejected_before_match_exists() {
        let mut room = lobby();
        assert!(room.set_map(0, Some("no_such_map".into()), None).is_err());

        room.map_id = "no_such_map".into();
        assert!(room.start_match(0, 7).is_err());
        assert!(room.current.is_none());
        assert_eq!(room.status, RoomStatus::Lobby);
    }

    #[test]
    fn rematch_keeps_seats_with_fresh_state() {
        let mut room = lobby();
        room.start_match(0, 7).unwrap();
        let first_seed = room.current.as_ref().unwrap().seed;

        room.start_match(0, 8).unwrap();
        let current = room.current.as_ref().unwrap();
        assert_eq!(current.match_id, 2);
        assert_ne!(current.seed, first_seed);
        assert_eq!(current.tick, 0);
        assert_eq!(current.game.players[1].name, "Bob");
        // Sequencers reset with the match.
        assert_eq!(room.last_seq_applied(0), -1);
    }

    #[test]
    fn reconnect_token_round_trip() {
        let mut room = lobby();
        let token = room.mint_token(1);
        room.mark_disconnected(1);
        assert!(!room.seats[1].connected);

        let seat = room.reconnect(&token).unwrap();
        assert_eq!(seat, 1);
        assert!(room.seats[1].connected);

        assert!(matches!(
            room.reconnect("bogus"),
            Err(SessionError::InvalidToken)
        ));
    }

    #[test]
    fn commands_rejected_without_match_or_wrong_match_id() {
        let mut room = lobby();
        let err = room
            .submit_command(0, 1, 0, "c", &Command::EndTurn)
            .unwrap_err();
        assert!(matches!(err, SessionError::NoMatch));

        room.start_match(0, 7).unwrap();
        let err = room
            .submit_command(0, 99, 0, "c", &Command::EndTurn)
            .unwrap_err();
        assert!(matches!(err, SessionError::MatchIdMismatch));
    }

    #[test]
    fn applied_commands_bump_the_tick() {
        let mut room = lobby();
        room.start_match(0, 7).unwrap();

        // Setup expects a settlement from seat 0; pick one legally.
        let node = {
            let current = room.current.as_ref().unwrap();
            crate::legal::legal_settlement_nodes(&current.game, 0, false)[0]
        };
        let outcome = room
            .submit_command(0, 1, 0, "c1", &Command::PlaceSettlement { node })
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::Accepted(ref s) if s.ack.applied
        ));
        assert_eq!(room.current.as_ref().unwrap().tick, 1);

        // A rejected command consumes the seq but does not advance the tick.
        let outcome = room
            .submit_command(0, 1, 1, "c2", &Command::EndTurn)
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::Accepted(ref s) if !s.ack.applied
        ));
        assert_eq!(room.current.as_ref().unwrap().tick, 1);

        // Duplicate of the applied command: acknowledged, tick unchanged.
        let outcome = room
            .submit_command(0, 1, 0, "c1", &Command::PlaceSettlement { node })
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::Accepted(ref s) if s.ack.duplicate
        ));
        assert_eq!(room.current.as_ref().unwrap().tick, 1);
    }

    #[tokio::test]
    async fn manager_creates_and_finds_rooms() {
        let manager = RoomManager::new();
        let room = manager.create_room("Alice".into(), 4).await;
        let code = room.lock().await.room_code.clone();
        assert_eq!(code.len(), 6);

        let found = manager.get_room(&code).await.unwrap();
        assert_eq!(found.lock().await.room_code, code);

        assert!(matches!(
            manager.get_room("ZZZZZZ").await,
            Err(SessionError::UnknownRoom { .. })
        ));

        manager.remove_room(&code).await;
        assert_eq!(manager.room_count().await, 0);
    }
}
