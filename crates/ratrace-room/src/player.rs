//! A room participant and the negotiation state they carry.

use ratrace_protocol::{GoalId, PlayerId, PlayerView, RoleId, Timestamp};
use serde::{Deserialize, Serialize};

/// One participant of a room, owned by its [`Room`](crate::Room).
///
/// Role state moves `None → selected → confirmed`. `is_ready` may only be
/// true while the role (in `choice` mode) and the goal are settled; any
/// change to either clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// Whether a live connection currently speaks for this player.
    pub connected: bool,
    pub role: Option<RoleId>,
    pub role_confirmed: bool,
    pub goal: Option<GoalId>,
    pub is_ready: bool,
    /// False once the player left or dropped during a game. Inactive
    /// players keep their seat in the turn order but are skipped.
    pub is_active: bool,
    pub joined_at: Timestamp,
    /// Profession-specific starting state produced by the game rules when
    /// the role was confirmed.
    #[serde(default)]
    pub setup: Option<serde_json::Value>,
}

impl Player {
    pub fn new(id: PlayerId, display_name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            connected: true,
            role: None,
            role_confirmed: false,
            goal: None,
            is_ready: false,
            is_active: true,
            joined_at: now,
            setup: None,
        }
    }

    /// Returns `true` if this player confirmed `role`.
    pub fn holds(&self, role: &RoleId) -> bool {
        self.role_confirmed && self.role.as_ref() == Some(role)
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            player_id: self.id,
            display_name: self.display_name.clone(),
            role: self.role.clone(),
            role_confirmed: self.role_confirmed,
            goal: self.goal.clone(),
            is_ready: self.is_ready,
            is_active: self.is_active,
            connected: self.connected,
        }
    }
}
