//! Session types: the server's record of one identity and its current
//! connection.

use std::time::Instant;

use ratrace_protocol::{PlayerId, RoomId};
use ratrace_transport::ConnectionId;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session bookkeeping.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long (in seconds) a disconnected player's session, and with it
    /// their last known room, is remembered before it is forgotten.
    ///
    /// This is *not* a grace period for the game: the room engine treats
    /// a disconnect as immediate. It only decides how long a returning
    /// player is offered their old room.
    ///
    /// Default: 3600 seconds.
    pub retain_disconnected_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retain_disconnected_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its life.
///
/// ```text
///   Connected ──(release)──→ Disconnected ──(retention elapsed)──→ Expired
///       ↑                         │
///       └─────────(bind)──────────┘
/// ```
#[derive(Debug, Clone)]
pub enum SessionState {
    Connected,

    /// Released at `since`; remembered until the retention window
    /// elapses.
    Disconnected { since: Instant },

    /// Waiting for [`SessionManager::cleanup_expired`](crate::SessionManager::cleanup_expired).
    Expired,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One player's binding to the server.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,

    /// The live connection speaking for this player, `None` while
    /// disconnected.
    pub connection: Option<ConnectionId>,

    /// The room this player was last a member of. Survives disconnects
    /// so the implicit `disconnect` and the reconnect view know where to
    /// go.
    pub room: Option<RoomId>,

    pub state: SessionState,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }
}
