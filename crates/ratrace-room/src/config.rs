//! Engine configuration and `CreateRoom` validation.

use std::collections::HashSet;
use std::time::Duration;

use ratrace_protocol::{RoleSelectionMode, RoomSettings};

use crate::{ConfigViolation, RoomError};

// ---------------------------------------------------------------------------
// RoomLimits
// ---------------------------------------------------------------------------

/// Bounds enforced when a room is created or started.
#[derive(Debug, Clone)]
pub struct RoomLimits {
    pub min_players: usize,
    pub max_players: usize,
    pub min_turn_secs: u64,
    pub max_turn_secs: u64,
    /// Active players required before the creator may start.
    pub min_players_to_start: usize,
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 10,
            min_turn_secs: 30,
            max_turn_secs: 300,
            min_players_to_start: 2,
        }
    }
}

impl RoomLimits {
    /// Checks `settings` against these limits, collecting every violation
    /// instead of stopping at the first.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidConfig`] listing all violations.
    pub fn validate(&self, settings: &RoomSettings) -> Result<(), RoomError> {
        let mut violations = Vec::new();

        if settings.name.trim().is_empty() {
            violations.push(ConfigViolation::EmptyName);
        }
        if !(self.min_players..=self.max_players).contains(&settings.max_players) {
            violations.push(ConfigViolation::MaxPlayersOutOfRange {
                value: settings.max_players,
                min: self.min_players,
                max: self.max_players,
            });
        }
        if !(self.min_turn_secs..=self.max_turn_secs).contains(&settings.turn_duration_secs) {
            violations.push(ConfigViolation::TurnDurationOutOfRange {
                value: settings.turn_duration_secs,
                min: self.min_turn_secs,
                max: self.max_turn_secs,
            });
        }

        if settings.available_roles.is_empty() {
            violations.push(ConfigViolation::NoRolesOffered);
        }
        let mut seen = HashSet::new();
        for role in &settings.available_roles {
            if !seen.insert(role) {
                violations.push(ConfigViolation::DuplicateRole(role.clone()));
            }
        }
        let distinct = seen.len();
        if settings.role_selection_mode != RoleSelectionMode::Choice
            && distinct > 0
            && distinct < settings.max_players
        {
            violations.push(ConfigViolation::NotEnoughRolesForMode {
                mode: settings.role_selection_mode,
                roles: distinct,
                max_players: settings.max_players,
            });
        }

        if matches!(&settings.password, Some(p) if p.is_empty()) {
            violations.push(ConfigViolation::PasswordUnusable);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(RoomError::InvalidConfig(violations))
        }
    }
}

// ---------------------------------------------------------------------------
// EvictionPolicy
// ---------------------------------------------------------------------------

/// When the idle sweep drops a room.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    /// A non-playing room with no players is dropped after this long
    /// without activity.
    pub empty_room_idle: Duration,
    /// A finished room is kept this long for result display.
    pub finished_retention: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            empty_room_idle: Duration::from_secs(60 * 60),
            finished_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff for persistence jobs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries per job, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): the initial backoff
    /// doubled per previous retry, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Everything the engine task needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub limits: RoomLimits,
    pub eviction: EvictionPolicy,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
    /// Bounded command channel size; callers wait when it is full.
    pub channel_size: usize,
    /// Seed for the engine RNG (shuffles, role draws, dice) when a room
    /// does not bring its own.
    pub seed: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: RoomLimits::default(),
            eviction: EvictionPolicy::default(),
            sweep_interval: Duration::from_secs(60),
            channel_size: 256,
            seed: None,
            retry: RetryPolicy::default(),
        }
    }
}
