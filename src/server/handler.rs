//! Per-connection SOCKS5 handshake state machine.
//!
//! Steps run strictly in order: greeting, optional user/password
//! subnegotiation, request, optional ruleset check, then dispatch to the
//! relay handler. Any malformed input ends the connection. Replies are only
//! sent where the protocol defines one.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use super::connection::{Connection, ConnectionState, Destination};
use super::decision::{self, AuthHandler, Decider, Verdict};
use super::frame_reader::FrameReader;
use super::registry::Socks5Server;
use super::relay::{BoxedStream, ClientStream, RelaySession};
use crate::error::{Result, Socks5Error};
use crate::protocol::{
    self, Command, ReplyStatus, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE,
    AUTH_METHOD_USERPASS, AUTH_NO_ACCEPTABLE, MAX_AUTH_METHODS, SOCKS5_VERSION,
};

/// Drives one client stream through the handshake.
pub(crate) struct ConnectionHandler {
    stream: ClientStream,
    connection: Connection,
    server: Socks5Server,
    state: ConnectionState,
}

impl ConnectionHandler {
    pub(crate) fn new(stream: BoxedStream, connection: Connection, server: Socks5Server) -> Self {
        Self {
            stream: FrameReader::new(stream),
            connection,
            server,
            state: ConnectionState::Greeting,
        }
    }

    /// Run the handshake and hand off to the relay handler.
    pub(crate) async fn run(mut self) -> Result<()> {
        if let Err(e) = self.handshake().await {
            debug!(
                "[conn {}] Handshake aborted while {}: {}",
                self.connection.id(),
                self.state,
                e
            );
            self.state = ConnectionState::Closed;
            return Err(e);
        }
        self.dispatch().await
    }

    async fn handshake(&mut self) -> Result<()> {
        if let Some(auth_handler) = self.greet().await? {
            self.transition(ConnectionState::Authenticating);
            self.authenticate(auth_handler).await?;
        }
        self.transition(ConnectionState::Requesting);
        self.read_request().await?;
        self.transition(ConnectionState::Validating);
        self.validate().await
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!("[conn {}] {} -> {}", self.connection.id(), self.state, next);
        self.state = next;
    }

    /// Greeting: `[VER, NMETHODS, METHODS...]`.
    ///
    /// Returns the auth handler when user/password was negotiated.
    async fn greet(&mut self) -> Result<Option<Arc<dyn AuthHandler>>> {
        let version = self.stream.read_u8().await?;
        if version != SOCKS5_VERSION {
            return Err(Socks5Error::UnsupportedVersion(version));
        }

        let count = self.stream.read_u8().await?;
        if count == 0 || count > MAX_AUTH_METHODS {
            return Err(Socks5Error::InvalidMethodCount(count));
        }
        let methods = self.stream.read_frame(count as usize).await?;

        let auth_handler = self.server.auth_handler();
        let required = if auth_handler.is_some() {
            AUTH_METHOD_USERPASS
        } else {
            AUTH_METHOD_NONE
        };

        if !methods.contains(&required) {
            self.reject(&protocol::method_selection(AUTH_NO_ACCEPTABLE))
                .await;
            return Err(Socks5Error::NoAcceptableMethod(required));
        }

        self.send(&protocol::method_selection(required)).await?;
        trace!(
            "[conn {}] Selected method 0x{:02x}",
            self.connection.id(),
            required
        );
        Ok(auth_handler)
    }

    /// Subnegotiation: `[VER, ULEN, UNAME..., PLEN, PASSWD...]`.
    async fn authenticate(&mut self, auth_handler: Arc<dyn AuthHandler>) -> Result<()> {
        // Subnegotiation version is not checked
        let _version = self.stream.read_u8().await?;
        let username_len = self.stream.read_u8().await?;
        let username = self.stream.read_frame(username_len as usize).await?;
        let password_len = self.stream.read_u8().await?;
        let password = self.stream.read_frame(password_len as usize).await?;

        let username = String::from_utf8_lossy(&username).into_owned();
        self.connection
            .set_credentials(username.clone(), String::from_utf8_lossy(&password).into_owned());

        let (decider, rx) = Decider::new();
        let decision = auth_handler
            .authenticate(&mut self.connection, decider.clone())
            .await;

        match decision::resolve(decision, &decider, rx).await {
            Verdict::Accept => {
                debug!(
                    "[conn {}] Authenticated as '{}'",
                    self.connection.id(),
                    username
                );
                self.send(&protocol::userpass_response(true)).await
            }
            Verdict::Deny => {
                self.reject(&protocol::userpass_response(false)).await;
                Err(Socks5Error::AuthDenied(username))
            }
        }
    }

    /// Request: `[VER, CMD, RSV, ATYP, DST.ADDR..., DST.PORT]`.
    async fn read_request(&mut self) -> Result<()> {
        // Request version and reserved byte are skipped
        let _version = self.stream.read_u8().await?;
        let command_byte = self.stream.read_u8().await?;
        let command =
            Command::from_byte(command_byte).ok_or(Socks5Error::UnknownCommand(command_byte))?;
        let _reserved = self.stream.read_u8().await?;

        let address_type = self.stream.read_u8().await?;
        let address = match address_type {
            ATYP_IPV4 => {
                let frame = self.stream.read_frame(4).await?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&frame);
                protocol::render_ipv4(&octets)
            }
            ATYP_DOMAIN => {
                let len = self.stream.read_u8().await?;
                let frame = self.stream.read_frame(len as usize).await?;
                protocol::render_domain(&frame)
            }
            ATYP_IPV6 => {
                let frame = self.stream.read_frame(16).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&frame);
                protocol::render_ipv6(&octets)
            }
            other => return Err(Socks5Error::UnknownAddressType(other)),
        };
        let port = self.stream.read_u16().await?;

        if !self.server.supports(command) {
            self.reject(&protocol::reply(ReplyStatus::CommandNotSupported))
                .await;
            return Err(Socks5Error::CommandNotSupported(command));
        }

        let destination = Destination {
            address,
            port,
            command,
        };
        debug!(
            "[conn {}] {} request for {}",
            self.connection.id(),
            command,
            destination
        );
        self.connection.set_destination(destination);
        Ok(())
    }

    /// Ruleset check. No validator means the request is allowed.
    async fn validate(&mut self) -> Result<()> {
        let Some(validator) = self.server.ruleset_validator() else {
            return Ok(());
        };

        let (decider, rx) = Decider::new();
        let decision = validator
            .validate(&mut self.connection, decider.clone())
            .await;

        match decision::resolve(decision, &decider, rx).await {
            Verdict::Accept => Ok(()),
            Verdict::Deny => {
                self.reject(&protocol::reply(ReplyStatus::ConnectionNotAllowed))
                    .await;
                let target = self
                    .connection
                    .destination()
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                Err(Socks5Error::RulesetDenied(target))
            }
        }
    }

    /// Hand the stream to the relay handler. From here on the relay handler
    /// owns the stream and its errors.
    async fn dispatch(mut self) -> Result<()> {
        self.transition(ConnectionState::Relaying);
        let relay_handler = self.server.relay_handler();
        let session = RelaySession::new(self.connection, self.stream);
        relay_handler.relay(session).await
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Best-effort reply followed by close.
    async fn reject(&mut self, frame: &[u8]) {
        let _ = self.stream.write_all(frame).await;
        let _ = self.stream.flush().await;
        let _ = self.stream.shutdown().await;
    }
}
