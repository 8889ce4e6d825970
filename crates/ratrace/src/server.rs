//! `RatraceServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → session → room
//! engine. The builder restores rooms from the persistence gateway
//! before the first connection is accepted.

use std::sync::Arc;
use std::time::Duration;

use ratrace_clock::Clock;
use ratrace_protocol::{Codec, JsonCodec};
use ratrace_room::{
    EngineConfig, EngineHandle, GameRules, PersistenceGateway, RestorePoint, spawn_engine,
};
use ratrace_session::{Authenticator, SessionConfig, SessionManager};
use ratrace_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::RatraceError;
use crate::handler::handle_connection;

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// How often disconnected sessions are checked for expiry.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state handed to every connection task.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) engine: EngineHandle,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) clock: Clock,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Ratrace server.
///
/// # Example
///
/// ```rust,ignore
/// use ratrace::prelude::*;
///
/// let server = RatraceServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build::<OpenTable, _, _>(my_auth, Arc::new(NoPersistence))
///     .await?;
/// server.run().await
/// ```
pub struct RatraceServerBuilder {
    bind_addr: String,
    engine_config: EngineConfig,
    session_config: SessionConfig,
    idle_timeout: Duration,
    clock: Option<Clock>,
}

impl RatraceServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            engine_config: EngineConfig::default(),
            session_config: SessionConfig::default(),
            idle_timeout: Duration::from_secs(60),
            clock: None,
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// A connection that sends nothing for this long is closed. Clients
    /// keep quiet connections alive with `Heartbeat`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Overrides the wall clock (defaults to the system clock).
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Binds the transport, restores persisted rooms from `gateway`, and
    /// starts the room engine with rules `R`.
    ///
    /// # Errors
    /// Fails if the address cannot be bound or the gateway cannot list
    /// the active rooms and the last room id.
    pub async fn build<R, A, P>(
        self,
        auth: A,
        gateway: Arc<P>,
    ) -> Result<RatraceServer<A, JsonCodec>, RatraceError>
    where
        R: GameRules,
        A: Authenticator,
        P: PersistenceGateway,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let restored = RestorePoint::load(gateway.as_ref()).await?;
        tracing::info!(
            rooms = restored.rooms.len(),
            last_room_id = ?restored.last_room_id,
            "restored rooms from persistence"
        );

        let clock = self.clock.unwrap_or_else(Clock::system);
        let engine = spawn_engine::<R, P>(self.engine_config, clock, gateway, restored);

        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionManager::new(self.session_config)),
            engine,
            auth,
            codec: JsonCodec,
            clock,
            idle_timeout: self.idle_timeout,
        });

        Ok(RatraceServer { transport, state })
    }
}

impl Default for RatraceServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Ratrace server. Call [`run()`](Self::run) to start accepting
/// connections.
pub struct RatraceServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl<A, C> RatraceServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    pub fn builder() -> RatraceServerBuilder {
        RatraceServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle to the room engine, e.g. to flush and stop it on
    /// shutdown.
    pub fn engine(&self) -> EngineHandle {
        self.state.engine.clone()
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// Each accepted connection gets its own handler task. A background
    /// task forgets sessions that stayed disconnected past the retention
    /// window.
    pub async fn run(mut self) -> Result<(), RatraceError> {
        tracing::info!("ratrace server running");

        tokio::spawn(sweep_sessions(Arc::clone(&self.state)));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn sweep_sessions<A: Authenticator, C: Codec>(state: Arc<ServerState<A, C>>) {
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let mut sessions = state.sessions.lock().await;
        let expired = sessions.expire_stale();
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "forgetting expired sessions");
            sessions.cleanup_expired();
        }
    }
}
