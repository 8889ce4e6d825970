//! Authentication hook for validating player identity.
//!
//! Ratrace does not issue identities. Whatever login flow the deployment
//! uses (messenger login, e-mail links, signed tokens) ends in a token
//! the client presents in its `Handshake`; an [`Authenticator`] turns
//! that token into a [`PlayerId`] or refuses it.

use ratrace_protocol::PlayerId;

use crate::SessionError;

/// Validates a client's auth token and returns their identity.
///
/// `Send + Sync + 'static` because one instance is shared by every
/// connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use ratrace_protocol::PlayerId;
/// use ratrace_session::{Authenticator, SessionError};
///
/// /// Accepts numeric tokens and uses them as the player id.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<PlayerId, SessionError> {
///         let id: u64 = token
///             .parse()
///             .map_err(|_| SessionError::AuthFailed("token must be a number".into()))?;
///         Ok(PlayerId(id))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token and returns the player's identity.
    ///
    /// Called once per connection, during the handshake. A missing token
    /// is passed as the empty string.
    ///
    /// # Errors
    /// Returns [`SessionError::AuthFailed`] if the token is rejected.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<PlayerId, SessionError>> + Send;
}
