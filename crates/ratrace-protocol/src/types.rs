//! Identity types and the read-only views of rooms that travel on the wire.
//!
//! Nothing in this module holds live state. A [`RoomView`] is a snapshot
//! rendered by the engine after a committed change; clients render it,
//! they never mutate it.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identity of a player, issued by the authenticator.
///
/// Distinct from the transport's connection id: a player keeps the same
/// `PlayerId` across reconnects, while every new socket gets a fresh
/// connection id. Serializes as a plain number (`#[serde(transparent)]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Opaque identifier of a room, assigned at creation and never reused
/// while the process (or its restored successor) is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A profession a player can claim. At most one confirmed holder per room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dream a player aims for. Several players may pick the same goal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub String);

impl GoalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unix time in milliseconds. Deadlines and activity stamps use this.
pub type Timestamp = u64;

// ---------------------------------------------------------------------------
// Room-level enums
// ---------------------------------------------------------------------------

/// Lifecycle of a room.
///
/// ```text
/// Waiting ──(start)──→ Playing ──(rules / abandoned)──→ Finished
/// ```
///
/// `Finished` is absorbing: the room stays queryable until the idle
/// sweep evicts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

impl RoomStatus {
    /// Returns `true` if new players may join.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// The only state reachable from this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Playing),
            Self::Playing => Some(Self::Finished),
            Self::Finished => None,
        }
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Playing => write!(f, "playing"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// How professions are handed out. Fixed at room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSelectionMode {
    /// Roles are drawn from a seeded shuffle when the game starts.
    Random,
    /// Players select and confirm roles themselves before readying up.
    Choice,
    /// The n-th player in turn order gets the n-th offered role.
    Assigned,
}

impl fmt::Display for RoleSelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::Choice => write!(f, "choice"),
            Self::Assigned => write!(f, "assigned"),
        }
    }
}

/// How the turn order is built from the roster at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOrderPolicy {
    /// Join order.
    #[default]
    Insertion,
    /// A seeded shuffle of the join order.
    Shuffled,
}

// ---------------------------------------------------------------------------
// Room settings (client-supplied)
// ---------------------------------------------------------------------------

/// Room configuration as requested by the creating client.
///
/// Validated by the engine before any room is allocated; every violated
/// constraint is reported at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub name: String,
    pub max_players: usize,
    pub turn_duration_secs: u64,
    #[serde(default)]
    pub password: Option<String>,
    pub role_selection_mode: RoleSelectionMode,
    pub available_roles: Vec<RoleId>,
    /// Goals offered in this room. Empty means any goal is accepted.
    #[serde(default)]
    pub available_goals: Vec<GoalId>,
    #[serde(default)]
    pub turn_order: TurnOrderPolicy,
    /// Seed for `Shuffled` turn order and `Random` role draws.
    #[serde(default)]
    pub seed: Option<u64>,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// What every member sees about one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub display_name: String,
    pub role: Option<RoleId>,
    pub role_confirmed: bool,
    pub goal: Option<GoalId>,
    pub is_ready: bool,
    pub is_active: bool,
    pub connected: bool,
}

/// The turn pointer of a playing (or finished) room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnView {
    pub order: Vec<PlayerId>,
    pub active_player: PlayerId,
    /// Monotonic turn sequence number, starting at 1.
    pub turn: u64,
    /// Number of the cycle through `order`, starting at 1.
    pub round: u32,
    pub deadline: Timestamp,
}

/// Full roster snapshot broadcast after every committed change.
///
/// Carries no password material; only whether one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomView {
    pub room_id: RoomId,
    pub name: String,
    pub creator: PlayerId,
    pub status: RoomStatus,
    pub max_players: usize,
    pub turn_duration_secs: u64,
    pub has_password: bool,
    pub role_selection_mode: RoleSelectionMode,
    pub available_roles: Vec<RoleId>,
    pub available_goals: Vec<GoalId>,
    pub players: Vec<PlayerView>,
    pub turn: Option<TurnView>,
    pub result: Option<GameResult>,
}

/// Outcome of a finished game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub winner: Option<PlayerId>,
    pub reason: String,
    pub rounds: u32,
}

impl GameResult {
    /// Result for a game whose last active player went away.
    pub fn abandoned(rounds: u32) -> Self {
        Self {
            winner: None,
            reason: "abandoned".to_string(),
            rounds,
        }
    }
}

/// A summary of a room returned in room listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub room_id: RoomId,
    pub name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub has_password: bool,
    pub role_selection_mode: RoleSelectionMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_ids_display() {
        assert_eq!(PlayerId(7).to_string(), "P-7");
        assert_eq!(RoomId(3).to_string(), "R-3");
        assert_eq!(RoleId::new("doctor").to_string(), "doctor");
    }

    #[test]
    fn test_role_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RoleId::new("pilot")).unwrap();
        assert_eq!(json, "\"pilot\"");
    }

    #[test]
    fn test_room_status_transitions_follow_strict_order() {
        assert_eq!(RoomStatus::Waiting.next(), Some(RoomStatus::Playing));
        assert_eq!(RoomStatus::Playing.next(), Some(RoomStatus::Finished));
        assert_eq!(RoomStatus::Finished.next(), None);
        assert!(RoomStatus::Waiting.can_transition_to(RoomStatus::Playing));
        assert!(!RoomStatus::Waiting.can_transition_to(RoomStatus::Finished));
        assert!(!RoomStatus::Finished.can_transition_to(RoomStatus::Waiting));
    }

    #[test]
    fn test_room_status_only_waiting_is_joinable() {
        assert!(RoomStatus::Waiting.is_joinable());
        assert!(!RoomStatus::Playing.is_joinable());
        assert!(!RoomStatus::Finished.is_joinable());
    }

    #[test]
    fn test_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&RoomStatus::Playing).unwrap(), "\"playing\"");
        assert_eq!(
            serde_json::to_string(&RoleSelectionMode::Choice).unwrap(),
            "\"choice\""
        );
    }

    #[test]
    fn test_unknown_selection_mode_is_rejected() {
        let result: Result<RoleSelectionMode, _> = serde_json::from_str("\"lottery\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_room_settings_optional_fields_default() {
        let json = r#"{
            "name": "table",
            "max_players": 4,
            "turn_duration_secs": 60,
            "role_selection_mode": "choice",
            "available_roles": ["doctor", "pilot"]
        }"#;
        let settings: RoomSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.password, None);
        assert!(settings.available_goals.is_empty());
        assert_eq!(settings.turn_order, TurnOrderPolicy::Insertion);
        assert_eq!(settings.seed, None);
    }
}
