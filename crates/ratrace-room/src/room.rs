//! The room record: settings, roster, and lifecycle bookkeeping.
//!
//! A `Room` is plain data. The [`RoomStore`](crate::RoomStore) is the only
//! thing that mutates it; everyone else sees `&Room` or a serialized
//! snapshot.

use ratrace_protocol::{
    GameResult, GoalId, PlayerId, RoleId, RoleSelectionMode, RoomId, RoomListEntry,
    RoomSettings, RoomStatus, RoomView, Timestamp, TurnOrderPolicy,
};
use serde::{Deserialize, Serialize};

use crate::{EvictionPolicy, Player, TurnState};

/// One multiplayer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creator: PlayerId,
    pub max_players: usize,
    pub turn_duration_secs: u64,
    /// Argon2 PHC string; the plain password is never stored.
    pub password_hash: Option<String>,
    pub role_selection_mode: RoleSelectionMode,
    /// Every role this room was created with. Never changes.
    pub offered_roles: Vec<RoleId>,
    /// Offered roles nobody has confirmed yet.
    pub available_roles: Vec<RoleId>,
    /// Empty means any goal is accepted.
    pub available_goals: Vec<GoalId>,
    pub turn_order_policy: TurnOrderPolicy,
    pub seed: Option<u64>,
    pub status: RoomStatus,
    /// Join order. Only rewritten while waiting.
    pub players: Vec<Player>,
    /// Set when the game starts; kept after it finishes for display.
    pub turn: Option<TurnState>,
    pub result: Option<GameResult>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub last_activity_at: Timestamp,
}

impl Room {
    /// A fresh waiting room with `creator` seated first.
    pub fn new(
        id: RoomId,
        settings: RoomSettings,
        creator: Player,
        password_hash: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name: settings.name.trim().to_string(),
            creator: creator.id,
            max_players: settings.max_players,
            turn_duration_secs: settings.turn_duration_secs,
            password_hash,
            role_selection_mode: settings.role_selection_mode,
            available_roles: settings.available_roles.clone(),
            offered_roles: settings.available_roles,
            available_goals: settings.available_goals,
            turn_order_policy: settings.turn_order,
            seed: settings.seed,
            status: RoomStatus::Waiting,
            players: vec![creator],
            turn: None,
            result: None,
            created_at: now,
            started_at: None,
            last_activity_at: now,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub(crate) fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Returns `true` if `id` has a seat in this room, active or not.
    pub fn is_member(&self, id: PlayerId) -> bool {
        self.player(id).is_some()
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_active)
    }

    pub fn active_count(&self) -> usize {
        self.active_players().count()
    }

    /// Who receives room-wide notifications: every active member.
    pub fn audience(&self) -> Vec<PlayerId> {
        self.active_players().map(|p| p.id).collect()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.last_activity_at = self.last_activity_at.max(now);
    }

    /// The confirmed holder of `role`, if any.
    pub fn holder_of(&self, role: &RoleId) -> Option<PlayerId> {
        self.players.iter().find(|p| p.holds(role)).map(|p| p.id)
    }

    /// Puts a confirmed role back on offer.
    pub(crate) fn release_role(&mut self, role: &RoleId) {
        if self.offered_roles.contains(role) && !self.available_roles.contains(role) {
            self.available_roles.push(role.clone());
            // keep catalog order stable for clients
            let offered = &self.offered_roles;
            self.available_roles
                .sort_by_key(|r| offered.iter().position(|o| o == r));
        }
    }

    /// Takes `id` off the waiting roster, freeing a confirmed role and
    /// handing the creator seat to the earliest remaining player.
    pub(crate) fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == id)?;
        let player = self.players.remove(index);

        if player.role_confirmed {
            if let Some(role) = &player.role {
                self.release_role(role);
            }
        }
        if self.creator == id {
            if let Some(next) = self.players.first() {
                tracing::info!(room_id = %self.id, from = %id, to = %next.id, "room host migrated");
                self.creator = next.id;
            }
        }
        Some(player)
    }

    /// Idle-eviction predicate. Playing rooms are never evicted.
    ///
    /// A room counts as empty when nobody in it is connected: a waiting
    /// roster restored after a restart keeps its seats until their owners
    /// return or the room idles out.
    pub fn should_evict(&self, now: Timestamp, policy: &EvictionPolicy) -> bool {
        let idle = now.saturating_sub(self.last_activity_at);
        let empty_idle = policy.empty_room_idle.as_millis() as u64;
        let retention = policy.finished_retention.as_millis() as u64;

        let deserted = self.players.iter().all(|p| !p.connected);

        match self.status {
            RoomStatus::Playing => false,
            RoomStatus::Waiting => deserted && idle > empty_idle,
            RoomStatus::Finished => (deserted && idle > empty_idle) || idle > retention,
        }
    }

    pub fn view(&self) -> RoomView {
        RoomView {
            room_id: self.id,
            name: self.name.clone(),
            creator: self.creator,
            status: self.status,
            max_players: self.max_players,
            turn_duration_secs: self.turn_duration_secs,
            has_password: self.has_password(),
            role_selection_mode: self.role_selection_mode,
            available_roles: self.available_roles.clone(),
            available_goals: self.available_goals.clone(),
            players: self.players.iter().map(Player::view).collect(),
            turn: self.turn.as_ref().map(TurnState::view),
            result: self.result.clone(),
        }
    }

    pub fn list_entry(&self) -> RoomListEntry {
        RoomListEntry {
            room_id: self.id,
            name: self.name.clone(),
            player_count: self.players.len(),
            max_players: self.max_players,
            has_password: self.has_password(),
            role_selection_mode: self.role_selection_mode,
        }
    }
}
