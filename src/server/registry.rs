//! Server registry: hook configuration and per-stream dispatch.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::decision::{AuthHandler, RulesetValidator};
use super::handler::ConnectionHandler;
use super::relay::{AsyncStream, DirectRelay, RelayHandler};
use crate::auth::StaticCredentials;
use crate::config::Config;
use crate::error::Result;
use crate::protocol::Command;

struct Hooks {
    auth_handler: Option<Arc<dyn AuthHandler>>,
    ruleset_validator: Option<Arc<dyn RulesetValidator>>,
    relay_handler: Arc<dyn RelayHandler>,
    supported_commands: HashSet<Command>,
}

struct ServerInner {
    hooks: RwLock<Hooks>,
    default_relay: Arc<dyn RelayHandler>,
    next_id: AtomicU64,
}

/// SOCKS5 server instance.
///
/// Cheap to clone; clones share the same hooks. Each hook is read at the
/// moment a connection reaches the step that consults it, so changing a
/// hook only affects connections that have not reached that step yet.
#[derive(Clone)]
pub struct Socks5Server {
    inner: Arc<ServerInner>,
}

impl Default for Socks5Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5Server {
    /// Server with no auth, no ruleset, [`DirectRelay`] and `connect` only.
    pub fn new() -> Self {
        Self::with_default_relay(Arc::new(DirectRelay::new()))
    }

    /// Server whose default relay handler is `default_relay`.
    pub fn with_default_relay(default_relay: Arc<dyn RelayHandler>) -> Self {
        let hooks = Hooks {
            auth_handler: None,
            ruleset_validator: None,
            relay_handler: Arc::clone(&default_relay),
            supported_commands: HashSet::from([Command::Connect]),
        };
        Self {
            inner: Arc::new(ServerInner {
                hooks: RwLock::new(hooks),
                default_relay,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Build a server from configuration: relay timeouts, static
    /// credentials when configured, and the supported command set.
    pub fn from_config(config: &Config) -> Self {
        let mut relay = DirectRelay::new()
            .with_idle_timeout(Duration::from_secs(config.server.idle_timeout_secs))
            .with_nodelay(config.server.nodelay);
        if config.server.connect_timeout_secs > 0 {
            relay = relay
                .with_connect_timeout(Duration::from_secs(config.server.connect_timeout_secs));
        }

        let server = Self::with_default_relay(Arc::new(relay));
        if let Some(ref credentials) = config.auth {
            server.set_auth_handler(StaticCredentials::from_config(credentials));
        }
        server.set_supported_commands(config.supported_commands.iter().copied());
        server
    }

    pub fn set_auth_handler<H: AuthHandler + 'static>(&self, handler: H) -> &Self {
        self.inner.hooks.write().auth_handler = Some(Arc::new(handler));
        self
    }

    pub fn disable_auth_handler(&self) -> &Self {
        self.inner.hooks.write().auth_handler = None;
        self
    }

    pub fn auth_handler(&self) -> Option<Arc<dyn AuthHandler>> {
        self.inner.hooks.read().auth_handler.clone()
    }

    pub fn set_ruleset_validator<V: RulesetValidator + 'static>(&self, validator: V) -> &Self {
        self.inner.hooks.write().ruleset_validator = Some(Arc::new(validator));
        self
    }

    pub fn disable_ruleset_validator(&self) -> &Self {
        self.inner.hooks.write().ruleset_validator = None;
        self
    }

    pub fn ruleset_validator(&self) -> Option<Arc<dyn RulesetValidator>> {
        self.inner.hooks.read().ruleset_validator.clone()
    }

    pub fn set_relay_handler<R: RelayHandler + 'static>(&self, handler: R) -> &Self {
        self.inner.hooks.write().relay_handler = Arc::new(handler);
        self
    }

    /// Restore the default relay handler.
    pub fn use_default_relay_handler(&self) -> &Self {
        self.inner.hooks.write().relay_handler = Arc::clone(&self.inner.default_relay);
        self
    }

    pub fn relay_handler(&self) -> Arc<dyn RelayHandler> {
        Arc::clone(&self.inner.hooks.read().relay_handler)
    }

    pub fn default_relay_handler(&self) -> Arc<dyn RelayHandler> {
        Arc::clone(&self.inner.default_relay)
    }

    /// Replace the set of commands accepted in requests.
    pub fn set_supported_commands<I: IntoIterator<Item = Command>>(&self, commands: I) -> &Self {
        self.inner.hooks.write().supported_commands = commands.into_iter().collect();
        self
    }

    pub fn supported_commands(&self) -> HashSet<Command> {
        self.inner.hooks.read().supported_commands.clone()
    }

    pub fn supports(&self, command: Command) -> bool {
        self.inner.hooks.read().supported_commands.contains(&command)
    }

    /// Spawn a task driving `stream` through the handshake and relay.
    pub fn accept<S: AsyncStream + 'static>(
        &self,
        stream: S,
        peer_addr: Option<SocketAddr>,
    ) -> JoinHandle<Result<()>> {
        let server = self.clone();
        tokio::spawn(async move { server.handle_stream(stream, peer_addr).await })
    }

    /// Drive `stream` to completion on the current task.
    ///
    /// Protocol violations, denials and transport errors end the connection
    /// and are only logged. An internal error, such as a relay handler
    /// answering with an unknown status, is logged and returned.
    pub async fn handle_stream<S: AsyncStream + 'static>(
        &self,
        stream: S,
        peer_addr: Option<SocketAddr>,
    ) -> Result<()> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        match peer_addr {
            Some(addr) => debug!("[conn {}] New connection from {}", id, addr),
            None => debug!("[conn {}] New connection", id),
        }

        let connection = Connection::new(id, peer_addr);
        let handler = ConnectionHandler::new(Box::new(stream), connection, self.clone());

        match handler.run().await {
            Ok(()) => {
                debug!("[conn {}] Closed", id);
                Ok(())
            }
            Err(e) if e.is_internal() => {
                error!("[conn {}] Internal error: {}", id, e);
                Err(e)
            }
            Err(e) if e.is_transport() => {
                trace!("[conn {}] Transport error: {}", id, e);
                Ok(())
            }
            Err(e) => {
                debug!("[conn {}] Closed: {}", id, e);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Socks5Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.inner.hooks.read();
        f.debug_struct("Socks5Server")
            .field("auth_handler", &hooks.auth_handler.is_some())
            .field("ruleset_validator", &hooks.ruleset_validator.is_some())
            .field("supported_commands", &hooks.supported_commands)
            .finish()
    }
}
