//! Turn scheduling state: the fixed order, the active pointer, and the
//! deadline of the current turn.
//!
//! ```text
//!            start                 pass / timeout / active player gone
//! waiting ─────────→ turn 1 active ───────────────────────────────→ turn 2 active ...
//!                        │
//!                   roll (settles the turn, never advances it)
//! ```
//!
//! Every advance bumps `turn`, the sequence number clients quote in
//! `PassTurn`. A pass or timer for an older sequence number finds the turn
//! already moved on and does nothing, which is what makes a racing pass
//! and timeout advance exactly once.

use ratrace_protocol::{PlayerId, RoomStatus, Timestamp, TurnView};
use serde::{Deserialize, Serialize};

use crate::Room;

/// The turn pointer of a started room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Fixed at start. Seats are never removed, only skipped.
    pub order: Vec<PlayerId>,
    pub active_index: usize,
    /// Monotonic sequence number, 1 for the first turn.
    pub turn: u64,
    /// Cycle through `order`, 1 for the first.
    pub round: u32,
    pub deadline: Timestamp,
    /// Actions the active player took this turn; non-zero means settled.
    pub actions: u32,
    /// Who held turn `turn - 1`.
    #[serde(default)]
    pub previous_player: Option<PlayerId>,
}

impl TurnState {
    fn new(order: Vec<PlayerId>, deadline: Timestamp) -> Self {
        Self {
            order,
            active_index: 0,
            turn: 1,
            round: 1,
            deadline,
            actions: 0,
            previous_player: None,
        }
    }

    pub fn active_player(&self) -> PlayerId {
        self.order[self.active_index]
    }

    pub fn is_settled(&self) -> bool {
        self.actions > 0
    }

    /// The player who held turn `seq`, if it is the current or the
    /// previous one. Older owners are not kept.
    pub fn owner_of(&self, seq: u64) -> Option<PlayerId> {
        if seq == self.turn {
            Some(self.active_player())
        } else if self.turn.checked_sub(1) == Some(seq) {
            self.previous_player
        } else {
            None
        }
    }

    pub fn view(&self) -> TurnView {
        TurnView {
            order: self.order.clone(),
            active_player: self.active_player(),
            turn: self.turn,
            round: self.round,
            deadline: self.deadline,
        }
    }
}

/// What an advance did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Advance {
    /// The new active player, `None` if nobody active is left.
    pub next: Option<PlayerId>,
    /// Whether the pointer wrapped past the end of the order.
    pub cycle_closed: bool,
}

impl Room {
    fn turn_length_ms(&self) -> u64 {
        self.turn_duration_secs * 1000
    }

    /// Moves the room to `playing` with `order` as the fixed turn order.
    /// `order` must be non-empty.
    pub(crate) fn begin_turns(&mut self, order: Vec<PlayerId>, now: Timestamp) {
        let deadline = now + self.turn_length_ms();
        self.turn = Some(TurnState::new(order, deadline));
        self.status = RoomStatus::Playing;
        self.started_at = Some(now);
        self.touch(now);
    }

    /// The player entitled to act, while playing.
    pub fn active_player(&self) -> Option<PlayerId> {
        match (&self.status, &self.turn) {
            (RoomStatus::Playing, Some(turn)) => Some(turn.active_player()),
            _ => None,
        }
    }

    /// The current turn sequence number, while playing.
    pub fn current_turn(&self) -> Option<u64> {
        match (&self.status, &self.turn) {
            (RoomStatus::Playing, Some(turn)) => Some(turn.turn),
            _ => None,
        }
    }

    pub fn deadline_passed(&self, now: Timestamp) -> bool {
        matches!((&self.status, &self.turn), (RoomStatus::Playing, Some(turn)) if now >= turn.deadline)
    }

    /// Moves the pointer to the next active player after the current one,
    /// cyclically. Starts a fresh turn with a full deadline.
    pub(crate) fn advance_turn(&mut self, now: Timestamp) -> Advance {
        let length = self.turn_length_ms();
        let Some(turn) = self.turn.as_mut() else {
            return Advance {
                next: None,
                cycle_closed: false,
            };
        };

        let seats = turn.order.len();
        let mut cycle_closed = false;
        for step in 1..=seats {
            let raw = turn.active_index + step;
            if raw >= seats {
                cycle_closed = true;
            }
            let index = raw % seats;
            let candidate = turn.order[index];
            let active = self
                .players
                .iter()
                .any(|p| p.id == candidate && p.is_active);
            if active {
                turn.previous_player = Some(turn.order[turn.active_index]);
                turn.active_index = index;
                turn.turn += 1;
                if cycle_closed {
                    turn.round += 1;
                }
                turn.deadline = now + length;
                turn.actions = 0;
                self.last_activity_at = self.last_activity_at.max(now);
                return Advance {
                    next: Some(candidate),
                    cycle_closed,
                };
            }
        }

        Advance {
            next: None,
            cycle_closed,
        }
    }

    /// Gives the current turn a fresh full-length deadline. Used after a
    /// restart, when the old deadline means nothing.
    pub(crate) fn reset_deadline(&mut self, now: Timestamp) {
        let length = self.turn_length_ms();
        if let Some(turn) = self.turn.as_mut() {
            turn.deadline = now + length;
        }
    }
}
