//! Role and goal negotiation on a waiting room.
//!
//! The one property everything here protects: for every role, at most one
//! active player holds it with `role_confirmed = true`. Selecting a role
//! only claims it tentatively; confirming is the moment it leaves
//! `available_roles`, and confirmation fails if someone else got there
//! first.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use ratrace_protocol::{GoalId, PlayerId, RoleId, RoleSelectionMode, RoomStatus};

use crate::{Room, RoomError};

impl Room {
    pub(crate) fn ensure_waiting(&self) -> Result<(), RoomError> {
        if self.status == RoomStatus::Waiting {
            Ok(())
        } else {
            Err(RoomError::GameAlreadyStarted(self.id))
        }
    }

    /// Fails unless `player` is an active member.
    pub(crate) fn ensure_member(&self, player: PlayerId) -> Result<(), RoomError> {
        match self.player(player) {
            Some(p) if p.is_active => Ok(()),
            _ => Err(RoomError::NotInRoom(player, self.id)),
        }
    }

    fn ensure_choice_mode(&self) -> Result<(), RoomError> {
        if self.role_selection_mode == RoleSelectionMode::Choice {
            Ok(())
        } else {
            Err(RoomError::RoleSelectionUnavailable(self.role_selection_mode))
        }
    }

    fn negotiating(&mut self, player: PlayerId) -> Result<&mut crate::Player, RoomError> {
        self.ensure_waiting()?;
        self.ensure_member(player)?;
        let id = self.id;
        self.player_mut(player).ok_or(RoomError::NotInRoom(player, id))
    }

    /// Tentatively claims `role` for `player`. A role confirmed earlier by
    /// the same player goes back on offer.
    pub(crate) fn select_role(&mut self, player: PlayerId, role: RoleId) -> Result<(), RoomError> {
        self.ensure_waiting()?;
        self.ensure_member(player)?;
        self.ensure_choice_mode()?;
        if !self.offered_roles.contains(&role) {
            return Err(RoomError::RoleNotOffered(role));
        }
        if matches!(self.holder_of(&role), Some(holder) if holder != player) {
            return Err(RoomError::RoleTaken(role));
        }

        let p = self.negotiating(player)?;
        if p.role.as_ref() == Some(&role) {
            return Ok(());
        }
        let released = if p.role_confirmed { p.role.take() } else { None };
        p.role = Some(role);
        p.role_confirmed = false;
        p.is_ready = false;
        p.setup = None;

        if let Some(old) = released {
            self.release_role(&old);
        }
        Ok(())
    }

    /// Confirms (or un-confirms) the selected role. Returns the role when
    /// this call newly confirmed it, so the caller can run setup effects.
    pub(crate) fn confirm_role(
        &mut self,
        player: PlayerId,
        confirmed: bool,
    ) -> Result<Option<RoleId>, RoomError> {
        self.ensure_waiting()?;
        self.ensure_member(player)?;
        self.ensure_choice_mode()?;

        let (role, already_confirmed) = match self.player(player) {
            Some(p) => match &p.role {
                Some(role) => (role.clone(), p.role_confirmed),
                None => return Err(RoomError::RoleNotSelected),
            },
            None => return Err(RoomError::NotInRoom(player, self.id)),
        };

        if confirmed {
            if already_confirmed {
                return Ok(None);
            }
            if self.holder_of(&role).is_some() {
                return Err(RoomError::RoleTaken(role));
            }
            self.available_roles.retain(|r| r != &role);
            let p = self.negotiating(player)?;
            p.role_confirmed = true;
            Ok(Some(role))
        } else {
            if already_confirmed {
                let p = self.negotiating(player)?;
                p.role_confirmed = false;
                p.is_ready = false;
                p.setup = None;
                self.release_role(&role);
            }
            Ok(None)
        }
    }

    pub(crate) fn select_goal(&mut self, player: PlayerId, goal: GoalId) -> Result<(), RoomError> {
        self.ensure_waiting()?;
        self.ensure_member(player)?;
        if !self.available_goals.is_empty() && !self.available_goals.contains(&goal) {
            return Err(RoomError::GoalNotOffered(goal));
        }

        let p = self.negotiating(player)?;
        if p.goal.as_ref() != Some(&goal) {
            p.goal = Some(goal);
            p.is_ready = false;
        }
        Ok(())
    }

    pub(crate) fn set_ready(&mut self, player: PlayerId) -> Result<(), RoomError> {
        self.ensure_waiting()?;
        self.ensure_member(player)?;
        let choice = self.role_selection_mode == RoleSelectionMode::Choice;

        let p = self.negotiating(player)?;
        if choice {
            if p.role.is_none() {
                return Err(RoomError::RoleNotSelected);
            }
            if !p.role_confirmed {
                return Err(RoomError::RoleNotConfirmed);
            }
        }
        if p.goal.is_none() {
            return Err(RoomError::GoalNotSelected);
        }
        p.is_ready = true;
        Ok(())
    }

    /// Active players who block the start.
    pub(crate) fn not_ready(&self) -> Vec<PlayerId> {
        self.active_players()
            .filter(|p| !p.is_ready)
            .map(|p| p.id)
            .collect()
    }

    /// Hands out roles at start in `random` and `assigned` modes: the
    /// i-th seat of `order` gets the i-th role of the (possibly shuffled)
    /// catalog. Returns what was assigned.
    pub(crate) fn assign_roles(&mut self, order: &[PlayerId], rng: &mut StdRng) -> Vec<(PlayerId, RoleId)> {
        let mut roles = self.offered_roles.clone();
        match self.role_selection_mode {
            RoleSelectionMode::Choice => return Vec::new(),
            RoleSelectionMode::Random => roles.shuffle(rng),
            RoleSelectionMode::Assigned => {}
        }

        let assigned: Vec<(PlayerId, RoleId)> = order.iter().copied().zip(roles).collect();
        for (player, role) in &assigned {
            if let Some(p) = self.player_mut(*player) {
                p.role = Some(role.clone());
                p.role_confirmed = true;
            }
            self.available_roles.retain(|r| r != role);
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use ratrace_protocol::{RoomId, RoomSettings, TurnOrderPolicy};

    use super::*;
    use crate::Player;

    fn doctor() -> RoleId {
        RoleId::new("doctor")
    }

    fn pilot() -> RoleId {
        RoleId::new("pilot")
    }

    fn room(mode: RoleSelectionMode) -> Room {
        let settings = RoomSettings {
            name: "t".into(),
            max_players: 2,
            turn_duration_secs: 30,
            password: None,
            role_selection_mode: mode,
            available_roles: vec![doctor(), pilot()],
            available_goals: vec![GoalId::new("yacht"), GoalId::new("island")],
            turn_order: TurnOrderPolicy::Insertion,
            seed: None,
        };
        let mut room = Room::new(RoomId(1), settings, Player::new(PlayerId(1), "p1", 0), None, 0);
        room.players.push(Player::new(PlayerId(2), "p2", 0));
        room
    }

    #[test]
    fn test_select_role_race_then_confirm_second_fails_role_taken() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_role(PlayerId(1), doctor()).unwrap();
        room.select_role(PlayerId(2), doctor()).unwrap();

        assert_eq!(room.confirm_role(PlayerId(1), true).unwrap(), Some(doctor()));
        let err = room.confirm_role(PlayerId(2), true).unwrap_err();

        assert_eq!(err, RoomError::RoleTaken(doctor()));
        assert_eq!(room.holder_of(&doctor()), Some(PlayerId(1)));
        assert_eq!(room.available_roles, vec![pilot()]);
    }

    #[test]
    fn test_select_role_confirmed_by_other_fails_role_taken() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_role(PlayerId(1), doctor()).unwrap();
        room.confirm_role(PlayerId(1), true).unwrap();

        let err = room.select_role(PlayerId(2), doctor()).unwrap_err();

        assert_eq!(err, RoomError::RoleTaken(doctor()));
    }

    #[test]
    fn test_select_role_not_offered() {
        let mut room = room(RoleSelectionMode::Choice);
        let err = room.select_role(PlayerId(1), RoleId::new("wizard")).unwrap_err();
        assert_eq!(err, RoomError::RoleNotOffered(RoleId::new("wizard")));
    }

    #[test]
    fn test_select_role_outside_choice_mode_unavailable() {
        let mut room = room(RoleSelectionMode::Random);
        let err = room.select_role(PlayerId(1), doctor()).unwrap_err();
        assert_eq!(err, RoomError::RoleSelectionUnavailable(RoleSelectionMode::Random));
    }

    #[test]
    fn test_select_role_switch_releases_confirmed_role_and_readiness() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_role(PlayerId(1), doctor()).unwrap();
        room.confirm_role(PlayerId(1), true).unwrap();
        room.select_goal(PlayerId(1), GoalId::new("yacht")).unwrap();
        room.set_ready(PlayerId(1)).unwrap();

        room.select_role(PlayerId(1), pilot()).unwrap();

        let p = room.player(PlayerId(1)).unwrap();
        assert!(!p.is_ready);
        assert!(!p.role_confirmed);
        assert_eq!(room.available_roles, vec![doctor(), pilot()]);
    }

    #[test]
    fn test_confirm_role_without_selection_fails() {
        let mut room = room(RoleSelectionMode::Choice);
        assert_eq!(
            room.confirm_role(PlayerId(1), true).unwrap_err(),
            RoomError::RoleNotSelected
        );
    }

    #[test]
    fn test_confirm_role_false_returns_role_to_offer() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_role(PlayerId(1), doctor()).unwrap();
        room.confirm_role(PlayerId(1), true).unwrap();

        room.confirm_role(PlayerId(1), false).unwrap();

        assert_eq!(room.holder_of(&doctor()), None);
        assert_eq!(room.available_roles, vec![doctor(), pilot()]);
        // now the other player can take it
        room.select_role(PlayerId(2), doctor()).unwrap();
        assert_eq!(room.confirm_role(PlayerId(2), true).unwrap(), Some(doctor()));
    }

    #[test]
    fn test_confirm_role_twice_is_idempotent() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_role(PlayerId(1), doctor()).unwrap();
        room.confirm_role(PlayerId(1), true).unwrap();
        assert_eq!(room.confirm_role(PlayerId(1), true).unwrap(), None);
        assert_eq!(room.available_roles, vec![pilot()]);
    }

    #[test]
    fn test_select_goal_not_offered() {
        let mut room = room(RoleSelectionMode::Choice);
        let err = room.select_goal(PlayerId(1), GoalId::new("moon")).unwrap_err();
        assert_eq!(err, RoomError::GoalNotOffered(GoalId::new("moon")));
    }

    #[test]
    fn test_select_goal_shared_between_players() {
        let mut room = room(RoleSelectionMode::Choice);
        room.select_goal(PlayerId(1), GoalId::new("yacht")).unwrap();
        room.select_goal(PlayerId(2), GoalId::new("yacht")).unwrap();
    }

    #[test]
    fn test_set_ready_requires_confirmed_role_and_goal() {
        let mut room = room(RoleSelectionMode::Choice);
        assert_eq!(room.set_ready(PlayerId(1)).unwrap_err(), RoomError::RoleNotSelected);

        room.select_role(PlayerId(1), doctor()).unwrap();
        assert_eq!(room.set_ready(PlayerId(1)).unwrap_err(), RoomError::RoleNotConfirmed);

        room.confirm_role(PlayerId(1), true).unwrap();
        assert_eq!(room.set_ready(PlayerId(1)).unwrap_err(), RoomError::GoalNotSelected);

        room.select_goal(PlayerId(1), GoalId::new("island")).unwrap();
        room.set_ready(PlayerId(1)).unwrap();
        assert!(room.player(PlayerId(1)).unwrap().is_ready);
        assert_eq!(room.not_ready(), vec![PlayerId(2)]);
    }

    #[test]
    fn test_set_ready_assigned_mode_needs_only_goal() {
        let mut room = room(RoleSelectionMode::Assigned);
        room.select_goal(PlayerId(2), GoalId::new("yacht")).unwrap();
        room.set_ready(PlayerId(2)).unwrap();
    }

    #[test]
    fn test_negotiation_after_start_rejected() {
        let mut room = room(RoleSelectionMode::Choice);
        room.status = RoomStatus::Playing;
        assert_eq!(
            room.select_goal(PlayerId(1), GoalId::new("yacht")).unwrap_err(),
            RoomError::GameAlreadyStarted(RoomId(1))
        );
    }

    #[test]
    fn test_assign_roles_assigned_mode_follows_catalog_order() {
        let mut room = room(RoleSelectionMode::Assigned);
        let mut rng = StdRng::seed_from_u64(1);

        let assigned = room.assign_roles(&[PlayerId(2), PlayerId(1)], &mut rng);

        assert_eq!(assigned, vec![(PlayerId(2), doctor()), (PlayerId(1), pilot())]);
        assert!(room.player(PlayerId(2)).unwrap().holds(&doctor()));
        assert!(room.available_roles.is_empty());
    }

    #[test]
    fn test_assign_roles_random_mode_is_a_permutation() {
        let mut room = room(RoleSelectionMode::Random);
        let mut rng = StdRng::seed_from_u64(42);

        let assigned = room.assign_roles(&[PlayerId(1), PlayerId(2)], &mut rng);

        let mut roles: Vec<RoleId> = assigned.into_iter().map(|(_, r)| r).collect();
        roles.sort();
        assert_eq!(roles, vec![doctor(), pilot()]);
    }
}
