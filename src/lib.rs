// Hexhaven server library - module organization.
//
// The authoritative core (board, map, state, rules, legal) is pure and
// synchronous; the session layer (manager, sequencer, protocol, websocket)
// wires it to connected seats with strict ordering and reconnection.

// Board geometry and map resolution
pub mod board;
pub mod map;

// Rules engine
pub mod commands;
pub mod legal;
pub mod rules;
pub mod state;

// Session protocol
pub mod errors;
pub mod manager;
pub mod protocol;
pub mod sequencer;
pub mod websocket;

// Re-export common types for convenient access
pub use crate::board::{BoardGraph, EdgeId, NodeId, PortKind, Resource, Terrain, Tile};
pub use crate::commands::{Command, GameEvent};
pub use crate::errors::{MapError, RuleError, RuleErrorKind, SessionError};
pub use crate::legal::{legal_moves, LegalMoves};
pub use crate::manager::{Room, RoomManager, RoomStatus};
pub use crate::map::{get_preset, list_presets, resolve_map, MapDescription, RulesConfig};
pub use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
pub use crate::sequencer::{CommandAck, CommandSequencer};
pub use crate::state::{GameState, PendingAction, Phase, PlayerState, Seat};
pub use crate::websocket::WebSocketService;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
