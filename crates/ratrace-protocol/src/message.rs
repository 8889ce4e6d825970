//! Inbound actions and outbound notifications.
//!
//! Both enums are internally tagged (`#[serde(tag = "type")]`), so a
//! browser client sends `{ "type": "PassTurn", "room_id": 3, "turn": 7 }`
//! and receives `{ "type": "TurnAdvanced", ... }`.

use serde::{Deserialize, Serialize};

use crate::{
    ErrorCode, GameResult, GoalId, PlayerId, RoleId, RoomId, RoomListEntry, RoomSettings,
    RoomView, Timestamp,
};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Everything a client may ask of the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Must be the first frame on a connection.
    Handshake {
        version: u32,
        token: Option<String>,
    },

    /// Keep-alive; echoed back with the server clock.
    Heartbeat { client_time: u64 },

    /// Joinable rooms.
    ListRooms,

    CreateRoom {
        settings: RoomSettings,
        creator_name: String,
    },

    /// Also serves as the explicit rejoin for an existing member.
    JoinRoom {
        room_id: RoomId,
        player_name: String,
        #[serde(default)]
        password: Option<String>,
    },

    LeaveRoom { room_id: RoomId },

    SelectRole { room_id: RoomId, role_id: RoleId },

    ConfirmRole { room_id: RoomId, confirmed: bool },

    SelectGoal { room_id: RoomId, goal_id: GoalId },

    SetReady { room_id: RoomId },

    /// Creator only.
    StartGame { room_id: RoomId },

    RollForTurn { room_id: RoomId },

    /// `turn` is the sequence number of the turn being ended. A pass for
    /// any other turn is ignored.
    PassTurn { room_id: RoomId, turn: u64 },

    /// Client is closing the connection.
    Disconnect { reason: String },
}

impl ClientMessage {
    /// Returns `true` for the role/goal/readiness negotiation actions,
    /// whose rejections are reported as `RoleSelectionRejected`.
    pub fn is_role_negotiation(&self) -> bool {
        matches!(
            self,
            Self::SelectRole { .. }
                | Self::ConfirmRole { .. }
                | Self::SelectGoal { .. }
                | Self::SetReady { .. }
        )
    }

    /// The room this action targets, if it targets one.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::JoinRoom { room_id, .. }
            | Self::LeaveRoom { room_id }
            | Self::SelectRole { room_id, .. }
            | Self::ConfirmRole { room_id, .. }
            | Self::SelectGoal { room_id, .. }
            | Self::SetReady { room_id }
            | Self::StartGame { room_id }
            | Self::RollForTurn { room_id }
            | Self::PassTurn { room_id, .. } => Some(*room_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Everything the server may push to a client.
///
/// Unless noted, notifications are broadcast to every connected member of
/// the affected room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Unicast reply to `Handshake`.
    HandshakeAck {
        player_id: PlayerId,
        server_time: Timestamp,
    },

    /// Unicast reply to `Heartbeat`.
    HeartbeatAck {
        client_time: u64,
        server_time: Timestamp,
    },

    /// Unicast reply to `ListRooms`.
    RoomList { rooms: Vec<RoomListEntry> },

    RoomRosterUpdated { room: RoomView },

    /// Unicast to the player who left.
    RoomLeft { room_id: RoomId },

    /// Unicast rejection of a role/goal/readiness action.
    RoleSelectionRejected {
        room_id: RoomId,
        code: ErrorCode,
        reason: String,
    },

    GameStarted {
        room_id: RoomId,
        turn_order: Vec<PlayerId>,
        active_player: PlayerId,
        turn: u64,
        deadline: Timestamp,
    },

    TurnAdvanced {
        room_id: RoomId,
        active_player: PlayerId,
        turn: u64,
        round: u32,
        deadline: Timestamp,
    },

    /// Result of a turn action as computed by the game rules.
    TurnActed {
        room_id: RoomId,
        player_id: PlayerId,
        turn: u64,
        outcome: serde_json::Value,
    },

    GameFinished { room_id: RoomId, result: GameResult },

    RoomRemoved { room_id: RoomId },

    /// Unicast rejection of any other action.
    Error { code: ErrorCode, message: String },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Framing shared by both directions.
///
/// `seq` is per connection and per direction; `timestamp` is the
/// sender's Unix-millisecond clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub payload: T,
}
