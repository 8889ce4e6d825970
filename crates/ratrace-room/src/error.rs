//! Error types for the room layer.
//!
//! Every variant is caller-local: it is reported to the connection that
//! asked, and the store is left exactly as it was.

use std::fmt;

use ratrace_protocol::{ErrorCode, GoalId, PlayerId, RoleId, RoleSelectionMode, RoomId};

/// One broken constraint in a `CreateRoom` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    EmptyName,
    MaxPlayersOutOfRange { value: usize, min: usize, max: usize },
    TurnDurationOutOfRange { value: u64, min: u64, max: u64 },
    NoRolesOffered,
    DuplicateRole(RoleId),
    /// `random` and `assigned` hand every player a role at start, so the
    /// catalog must cover a full room.
    NotEnoughRolesForMode {
        mode: RoleSelectionMode,
        roles: usize,
        max_players: usize,
    },
    PasswordUnusable,
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "name must not be empty"),
            Self::MaxPlayersOutOfRange { value, min, max } => {
                write!(f, "max_players {value} outside {min}..={max}")
            }
            Self::TurnDurationOutOfRange { value, min, max } => {
                write!(f, "turn_duration_secs {value} outside {min}..={max}")
            }
            Self::NoRolesOffered => write!(f, "available_roles must not be empty"),
            Self::DuplicateRole(role) => write!(f, "role {role} offered twice"),
            Self::NotEnoughRolesForMode {
                mode,
                roles,
                max_players,
            } => write!(
                f,
                "{mode} mode needs at least {max_players} roles, got {roles}"
            ),
            Self::PasswordUnusable => write!(f, "password must not be empty"),
        }
    }
}

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    // -- validation -------------------------------------------------------
    #[error("invalid room config: {}", join(.0))]
    InvalidConfig(Vec<ConfigViolation>),

    #[error("wrong password for room {0}")]
    InvalidPassword(RoomId),

    #[error("role {0} is not offered in this room")]
    RoleNotOffered(RoleId),

    #[error("role {0} is already confirmed by another player")]
    RoleTaken(RoleId),

    #[error("no role selected")]
    RoleNotSelected,

    #[error("role not confirmed")]
    RoleNotConfirmed,

    #[error("goal {0} is not offered in this room")]
    GoalNotOffered(GoalId),

    #[error("no goal selected")]
    GoalNotSelected,

    // -- preconditions ----------------------------------------------------
    #[error("room {0} not found")]
    NotFound(RoomId),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("game in room {0} has already started")]
    GameAlreadyStarted(RoomId),

    #[error("no game is running in room {0}")]
    GameNotRunning(RoomId),

    #[error("roles are not chosen by players in {0} mode")]
    RoleSelectionUnavailable(RoleSelectionMode),

    #[error("player {0} not in room {1}")]
    NotInRoom(PlayerId, RoomId),

    #[error("player {0} already in room {1}")]
    AlreadyInRoom(PlayerId, RoomId),

    #[error("only the room creator can do that, {0} is not")]
    NotRoomCreator(PlayerId),

    #[error("it is {active}'s turn, not {player}'s")]
    NotYourTurn { player: PlayerId, active: PlayerId },

    #[error("turn {turn} already acted on, pass to end it")]
    TurnAlreadySettled { turn: u64 },

    #[error("{have} active players, at least {need} needed")]
    NotEnoughPlayers { have: usize, need: usize },

    #[error("players not ready: {}", join(.0))]
    PlayersNotReady(Vec<PlayerId>),

    // -- infrastructure ---------------------------------------------------
    /// The engine task is gone or its command channel is closed.
    #[error("room engine is unavailable")]
    Unavailable,
}

impl RoomError {
    /// The machine-readable reason code sent to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::InvalidPassword(_) => ErrorCode::InvalidPassword,
            Self::RoleNotOffered(_) => ErrorCode::RoleNotOffered,
            Self::RoleTaken(_) => ErrorCode::RoleTaken,
            Self::RoleNotSelected => ErrorCode::RoleNotSelected,
            Self::RoleNotConfirmed => ErrorCode::RoleNotConfirmed,
            Self::GoalNotOffered(_) => ErrorCode::GoalNotOffered,
            Self::GoalNotSelected => ErrorCode::GoalNotSelected,
            Self::NotFound(_) => ErrorCode::RoomNotFound,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::GameAlreadyStarted(_) => ErrorCode::GameAlreadyStarted,
            Self::GameNotRunning(_) => ErrorCode::GameNotRunning,
            Self::RoleSelectionUnavailable(_) => ErrorCode::RoleSelectionUnavailable,
            Self::NotInRoom(..) => ErrorCode::NotInRoom,
            Self::AlreadyInRoom(..) => ErrorCode::AlreadyInRoom,
            Self::NotRoomCreator(_) => ErrorCode::NotRoomCreator,
            Self::NotYourTurn { .. } => ErrorCode::NotYourTurn,
            Self::TurnAlreadySettled { .. } => ErrorCode::TurnAlreadySettled,
            Self::NotEnoughPlayers { .. } => ErrorCode::NotEnoughPlayers,
            Self::PlayersNotReady(_) => ErrorCode::PlayersNotReady,
            Self::Unavailable => ErrorCode::Unavailable,
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reported by a [`PersistenceGateway`](crate::PersistenceGateway).
///
/// Never surfaced to clients: the mirror logs and retries them.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The backing store refused or failed the operation.
    #[error("persistence backend failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backing store cannot be reached right now.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display_lists_every_violation() {
        let err = RoomError::InvalidConfig(vec![
            ConfigViolation::EmptyName,
            ConfigViolation::NoRolesOffered,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid room config: name must not be empty, available_roles must not be empty"
        );
    }

    #[test]
    fn test_players_not_ready_display_names_blockers() {
        let err = RoomError::PlayersNotReady(vec![PlayerId(2), PlayerId(5)]);
        assert_eq!(err.to_string(), "players not ready: P-2, P-5");
        assert_eq!(err.code(), ErrorCode::PlayersNotReady);
    }

    #[test]
    fn test_code_maps_distinct_join_failures() {
        let room = RoomId(1);
        assert_eq!(RoomError::NotFound(room).code(), ErrorCode::RoomNotFound);
        assert_eq!(RoomError::RoomFull(room).code(), ErrorCode::RoomFull);
        assert_eq!(
            RoomError::GameAlreadyStarted(room).code(),
            ErrorCode::GameAlreadyStarted
        );
        assert_eq!(
            RoomError::InvalidPassword(room).code(),
            ErrorCode::InvalidPassword
        );
    }
}
