//! The session manager: which connection speaks for which player.
//!
//! `SessionManager` is a plain single-owner structure. The server keeps it
//! behind one async mutex and holds the lock only for the bookkeeping
//! call, never across network I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ratrace_protocol::{PlayerId, RoomId};
use ratrace_transport::ConnectionId;

use crate::{Session, SessionConfig, SessionError, SessionState};

/// Tracks every connected (or recently disconnected) player.
///
/// ## Lifecycle
///
/// ```text
/// bind() ──→ set_room() ──→ release() ──→ bind() again
///                              │              (reconnect: room kept)
///                              ▼
///                        expire_stale() ──→ cleanup_expired()
/// ```
pub struct SessionManager {
    sessions: HashMap<PlayerId, Session>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Binds `player_id` to a freshly authenticated connection.
    ///
    /// A player with a disconnected or expired session is rebound and
    /// keeps their last known room. Returns that room, if any, so the
    /// caller can send the reconnect view.
    ///
    /// # Errors
    /// Returns [`SessionError::AlreadyConnected`] if another live
    /// connection already speaks for this player.
    pub fn bind(
        &mut self,
        player_id: PlayerId,
        connection: ConnectionId,
    ) -> Result<Option<RoomId>, SessionError> {
        if let Some(existing) = self.sessions.get_mut(&player_id) {
            if existing.is_connected() {
                return Err(SessionError::AlreadyConnected(player_id));
            }
            if matches!(existing.state, SessionState::Expired) {
                existing.room = None;
            }
            existing.connection = Some(connection);
            existing.state = SessionState::Connected;
            tracing::info!(%player_id, %connection, room = ?existing.room, "session rebound");
            return Ok(existing.room);
        }

        self.sessions.insert(
            player_id,
            Session {
                player_id,
                connection: Some(connection),
                room: None,
                state: SessionState::Connected,
            },
        );
        tracing::info!(%player_id, %connection, "session created");
        Ok(None)
    }

    /// Records the room `player_id` is now a member of (`None` after
    /// leaving).
    ///
    /// # Errors
    /// Returns [`SessionError::NotFound`] if the player has no session.
    pub fn set_room(
        &mut self,
        player_id: PlayerId,
        room: Option<RoomId>,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::NotFound(player_id))?;
        session.room = room;
        Ok(())
    }

    /// The last known room of `player_id`.
    pub fn room_of(&self, player_id: PlayerId) -> Option<RoomId> {
        self.sessions.get(&player_id).and_then(|s| s.room)
    }

    /// Unbinds `connection` from `player_id` and returns the player's last
    /// known room, so the caller can feed an implicit `disconnect` into
    /// it.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: no session for this player.
    /// - [`SessionError::StaleConnection`]: the player has since bound a
    ///   different connection; nothing is changed.
    pub fn release(
        &mut self,
        player_id: PlayerId,
        connection: ConnectionId,
    ) -> Result<Option<RoomId>, SessionError> {
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::NotFound(player_id))?;

        if session.connection != Some(connection) {
            return Err(SessionError::StaleConnection {
                player_id,
                connection,
            });
        }

        session.connection = None;
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        tracing::info!(%player_id, %connection, "session released");
        Ok(session.room)
    }

    /// Marks every session disconnected for longer than the retention
    /// window as expired and returns their ids.
    pub fn expire_stale(&mut self) -> Vec<PlayerId> {
        let retain = Duration::from_secs(self.config.retain_disconnected_secs);
        let mut expired = Vec::new();

        for session in self.sessions.values_mut() {
            if let SessionState::Disconnected { since } = &session.state {
                if since.elapsed() >= retain {
                    session.state = SessionState::Expired;
                    expired.push(session.player_id);
                    tracing::debug!(player_id = %session.player_id, "session expired");
                }
            }
        }

        expired
    }

    /// Removes all expired sessions.
    pub fn cleanup_expired(&mut self) {
        self.sessions
            .retain(|_, session| !matches!(session.state, SessionState::Expired));
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<&Session> {
        self.sessions.get(player_id)
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_instant_expiry() -> SessionManager {
        SessionManager::new(SessionConfig {
            retain_disconnected_secs: 0,
        })
    }

    fn manager_with_long_retention() -> SessionManager {
        SessionManager::new(SessionConfig::default())
    }

    fn pid(id: u64) -> PlayerId {
        PlayerId(id)
    }

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    // =====================================================================
    // bind()
    // =====================================================================

    #[test]
    fn test_bind_new_player_creates_connected_session() {
        let mut mgr = manager_with_long_retention();

        let room = mgr.bind(pid(1), conn(10)).unwrap();

        assert_eq!(room, None);
        let session = mgr.get(&pid(1)).unwrap();
        assert!(session.is_connected());
        assert_eq!(session.connection, Some(conn(10)));
    }

    #[test]
    fn test_bind_already_connected_returns_error() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();

        let result = mgr.bind(pid(1), conn(11));

        assert!(matches!(result, Err(SessionError::AlreadyConnected(p)) if p == pid(1)));
        assert_eq!(mgr.get(&pid(1)).unwrap().connection, Some(conn(10)));
    }

    #[test]
    fn test_bind_after_release_returns_last_room() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.set_room(pid(1), Some(RoomId(3))).unwrap();
        mgr.release(pid(1), conn(10)).unwrap();

        let room = mgr.bind(pid(1), conn(11)).unwrap();

        assert_eq!(room, Some(RoomId(3)));
        assert_eq!(mgr.get(&pid(1)).unwrap().connection, Some(conn(11)));
    }

    #[test]
    fn test_bind_after_expiry_forgets_room() {
        let mut mgr = manager_with_instant_expiry();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.set_room(pid(1), Some(RoomId(3))).unwrap();
        mgr.release(pid(1), conn(10)).unwrap();
        mgr.expire_stale();

        let room = mgr.bind(pid(1), conn(11)).unwrap();

        assert_eq!(room, None);
    }

    // =====================================================================
    // release()
    // =====================================================================

    #[test]
    fn test_release_current_connection_returns_room() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.set_room(pid(1), Some(RoomId(7))).unwrap();

        let room = mgr.release(pid(1), conn(10)).unwrap();

        assert_eq!(room, Some(RoomId(7)));
        let session = mgr.get(&pid(1)).unwrap();
        assert!(matches!(session.state, SessionState::Disconnected { .. }));
        assert_eq!(session.connection, None);
    }

    #[test]
    fn test_release_stale_connection_is_rejected() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.release(pid(1), conn(10)).unwrap();
        mgr.bind(pid(1), conn(11)).unwrap();

        // The old socket's close arrives after the player came back.
        let result = mgr.release(pid(1), conn(10));

        assert!(matches!(result, Err(SessionError::StaleConnection { .. })));
        assert!(mgr.get(&pid(1)).unwrap().is_connected());
    }

    #[test]
    fn test_release_unknown_player_returns_not_found() {
        let mut mgr = manager_with_long_retention();
        let result = mgr.release(pid(99), conn(1));
        assert!(matches!(result, Err(SessionError::NotFound(p)) if p == pid(99)));
    }

    // =====================================================================
    // set_room() / room_of()
    // =====================================================================

    #[test]
    fn test_set_room_then_clear() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();

        mgr.set_room(pid(1), Some(RoomId(2))).unwrap();
        assert_eq!(mgr.room_of(pid(1)), Some(RoomId(2)));

        mgr.set_room(pid(1), None).unwrap();
        assert_eq!(mgr.room_of(pid(1)), None);
    }

    #[test]
    fn test_set_room_unknown_player_returns_not_found() {
        let mut mgr = manager_with_long_retention();
        assert!(matches!(
            mgr.set_room(pid(5), Some(RoomId(1))),
            Err(SessionError::NotFound(_))
        ));
    }

    // =====================================================================
    // expire_stale() / cleanup_expired()
    // =====================================================================

    #[test]
    fn test_expire_stale_skips_connected_sessions() {
        let mut mgr = manager_with_instant_expiry();
        mgr.bind(pid(1), conn(10)).unwrap();

        assert!(mgr.expire_stale().is_empty());
    }

    #[test]
    fn test_expire_stale_long_retention_keeps_disconnected() {
        let mut mgr = manager_with_long_retention();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.release(pid(1), conn(10)).unwrap();

        assert!(mgr.expire_stale().is_empty());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_cleanup_expired_removes_only_expired() {
        let mut mgr = manager_with_instant_expiry();
        mgr.bind(pid(1), conn(10)).unwrap();
        mgr.bind(pid(2), conn(20)).unwrap();
        mgr.release(pid(1), conn(10)).unwrap();

        let expired = mgr.expire_stale();
        mgr.cleanup_expired();

        assert_eq!(expired, vec![pid(1)]);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.get(&pid(2)).is_some());
        assert!(!mgr.is_empty());
    }
}
