use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-level rejection kinds. Every kind maps to a stable wire code so
/// clients can branch on `error.code` without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleErrorKind {
    NotYourTurn,
    WrongPhase,
    PendingAction,
    IllegalMove,
    InsufficientResources,
    Invalid,
    GameOver,
}

impl RuleErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            RuleErrorKind::NotYourTurn => "not_your_turn",
            RuleErrorKind::WrongPhase => "wrong_phase",
            RuleErrorKind::PendingAction => "pending_action",
            RuleErrorKind::IllegalMove => "illegal_move",
            RuleErrorKind::InsufficientResources => "insufficient_resources",
            RuleErrorKind::Invalid => "invalid",
            RuleErrorKind::GameOver => "game_over",
        }
    }
}

/// A rejected command. The engine guarantees state is untouched whenever one
/// of these is returned.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("{message}")]
pub struct RuleError {
    pub kind: RuleErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl RuleError {
    pub fn new(kind: RuleErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(
        kind: RuleErrorKind,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: Some(detail),
        }
    }

    pub fn not_your_turn() -> Self {
        Self::new(RuleErrorKind::NotYourTurn, "Not your turn")
    }

    pub fn wrong_phase(message: impl Into<String>) -> Self {
        Self::new(RuleErrorKind::WrongPhase, message)
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(RuleErrorKind::PendingAction, message)
    }

    pub fn illegal(message: impl Into<String>) -> Self {
        Self::new(RuleErrorKind::IllegalMove, message)
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self::new(RuleErrorKind::InsufficientResources, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(RuleErrorKind::Invalid, message)
    }

    pub fn game_over() -> Self {
        Self::new(RuleErrorKind::GameOver, "Game over")
    }
}

/// Fatal map-resolution failures. These abort match creation before any seat
/// is exposed to a partially built match.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("map resolution failed: {message}")]
pub struct MapError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl MapError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail),
        }
    }
}

/// Room / session layer errors.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SessionError {
    #[error("Room not found: {room_code}")]
    UnknownRoom { room_code: String },

    #[error("Room {room_code} is full")]
    RoomFull { room_code: String },

    #[error("Only the host may do that")]
    NotHost,

    #[error("Need at least 2 seated players")]
    NotEnoughPlayers,

    #[error("Match not started")]
    NoMatch,

    #[error("Invalid reconnect token")]
    InvalidToken,

    #[error("Match id mismatch")]
    MatchIdMismatch,

    #[error("Map error: {0}")]
    Map(#[from] MapError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::UnknownRoom { .. } => "unknown_room",
            SessionError::RoomFull { .. } => "room_full",
            SessionError::NotHost => "not_host",
            SessionError::NotEnoughPlayers => "invalid",
            SessionError::NoMatch => "no_match",
            SessionError::InvalidToken => "invalid_token",
            SessionError::MatchIdMismatch => "invalid",
            SessionError::Map(_) => "map_invalid",
        }
    }
}

pub type RuleResult<T> = Result<T, RuleError>;
pub type SessionResult<T> = Result<T, SessionError>;
