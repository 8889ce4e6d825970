//! Error types for the protocol layer, and the machine-readable codes the
//! server attaches to every rejection it sends a client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or an
    /// unknown message type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame decoded but breaks a protocol rule (wrong first
    /// message, version mismatch, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Reason code attached to every rejected action.
///
/// Clients switch on this, never on the human-readable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // validation
    InvalidConfig,
    InvalidPassword,
    RoleNotOffered,
    RoleTaken,
    RoleNotSelected,
    RoleNotConfirmed,
    GoalNotOffered,
    GoalNotSelected,
    // preconditions
    RoomNotFound,
    RoomFull,
    GameAlreadyStarted,
    GameNotRunning,
    RoleSelectionUnavailable,
    NotInRoom,
    AlreadyInRoom,
    NotRoomCreator,
    NotYourTurn,
    TurnAlreadySettled,
    NotEnoughPlayers,
    PlayersNotReady,
    // connection level
    BadRequest,
    Unauthorized,
    Unavailable,
}

impl ErrorCode {
    /// The wire spelling, e.g. `ROOM_FULL`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::RoleNotOffered => "ROLE_NOT_OFFERED",
            Self::RoleTaken => "ROLE_TAKEN",
            Self::RoleNotSelected => "ROLE_NOT_SELECTED",
            Self::RoleNotConfirmed => "ROLE_NOT_CONFIRMED",
            Self::GoalNotOffered => "GOAL_NOT_OFFERED",
            Self::GoalNotSelected => "GOAL_NOT_SELECTED",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::GameAlreadyStarted => "GAME_ALREADY_STARTED",
            Self::GameNotRunning => "GAME_NOT_RUNNING",
            Self::RoleSelectionUnavailable => "ROLE_SELECTION_UNAVAILABLE",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::NotRoomCreator => "NOT_ROOM_CREATOR",
            Self::NotYourTurn => "NOT_YOUR_TURN",
            Self::TurnAlreadySettled => "TURN_ALREADY_SETTLED",
            Self::NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            Self::PlayersNotReady => "PLAYERS_NOT_READY",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
