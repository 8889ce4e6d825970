//! Error types for the session layer.

use ratrace_protocol::PlayerId;
use ratrace_transport::ConnectionId;

/// Errors that can occur while authenticating or binding a player.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session exists for the given player.
    #[error("session not found for player {0}")]
    NotFound(PlayerId),

    /// The player is already bound to another live connection.
    #[error("player {0} already has an active session")]
    AlreadyConnected(PlayerId),

    /// The connection is no longer the one bound to this player, e.g. a
    /// late close from a socket the player has since replaced.
    #[error("connection {connection} is not bound to player {player_id}")]
    StaleConnection {
        player_id: PlayerId,
        connection: ConnectionId,
    },
}
