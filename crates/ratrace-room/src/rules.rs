//! The `GameRules` trait: the board-game collaborator behind the engine.
//!
//! The engine owns who is in a room and whose turn it is. What a role
//! starts with, what a turn action does, and when the game is over belong
//! to the game itself, which plugs in here. Every method has a default so
//! the engine runs without any board rules at all ([`OpenTable`]).

use rand::Rng;
use rand::rngs::StdRng;
use ratrace_protocol::{GameResult, PlayerId, RoleId};

use crate::Room;

/// Rules hooks called by the engine at fixed points.
///
/// All methods are associated functions: rules carry no state of their
/// own, everything they may look at is in the [`Room`].
pub trait GameRules: Send + Sync + 'static {
    /// Called when `player` confirms `role` (or is assigned it at start).
    /// The returned value is stored on the player as its starting setup.
    fn on_role_confirmed(_room: &Room, _player: PlayerId, _role: &RoleId) -> Option<serde_json::Value> {
        None
    }

    /// Resolves a turn action by the active player and returns the
    /// outcome broadcast to the room. Default: one six-sided die.
    fn on_turn_action(_room: &Room, _player: PlayerId, rng: &mut StdRng) -> serde_json::Value {
        serde_json::json!({ "roll": rng.random_range(1..=6u8) })
    }

    /// Asked after every closed cycle through the turn order. `Some`
    /// ends the game with that result.
    fn is_finished(_room: &Room) -> Option<GameResult> {
        None
    }
}

/// Rules that never end the game and roll one die per action.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTable;

impl GameRules for OpenTable {}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use ratrace_protocol::{RoleSelectionMode, RoomId, RoomSettings, TurnOrderPolicy};

    use super::*;
    use crate::Player;

    fn room() -> Room {
        let settings = RoomSettings {
            name: "t".into(),
            max_players: 2,
            turn_duration_secs: 30,
            password: None,
            role_selection_mode: RoleSelectionMode::Choice,
            available_roles: vec![RoleId::new("doctor")],
            available_goals: Vec::new(),
            turn_order: TurnOrderPolicy::Insertion,
            seed: None,
        };
        Room::new(RoomId(1), settings, Player::new(PlayerId(1), "ann", 0), None, 0)
    }

    #[test]
    fn test_open_table_rolls_a_d6() {
        let room = room();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let outcome = OpenTable::on_turn_action(&room, PlayerId(1), &mut rng);
            let roll = outcome["roll"].as_u64().unwrap();
            assert!((1..=6).contains(&roll));
        }
    }

    #[test]
    fn test_open_table_never_finishes() {
        assert_eq!(OpenTable::is_finished(&room()), None);
        assert_eq!(
            OpenTable::on_role_confirmed(&room(), PlayerId(1), &RoleId::new("doctor")),
            None
        );
    }
}
