//! socks5-proxy - SOCKS5 proxy protocol engine
//!
//! This library provides:
//! - An exact-length frame reader that reassembles fragmented client input
//! - A per-connection SOCKS5 handshake state machine (greeting, user/password
//!   subnegotiation, request parsing)
//! - Pluggable decision hooks for authentication and request rulesets
//! - A pluggable relay stage with a default TCP-connect relay
//! - A TCP listener and YAML configuration for standalone use
//!
//! ```no_run
//! use socks5_proxy::{Connection, Decider, Decision, Socks5Server};
//!
//! # async fn run(stream: tokio::net::TcpStream) {
//! let server = Socks5Server::new();
//! server.set_ruleset_validator(|conn: &mut Connection, _: Decider| {
//!     Decision::from(conn.destination_port() != Some(25))
//! });
//! server.accept(stream, None);
//! # }
//! ```

#[macro_use]
mod logging;

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::StaticCredentials;
pub use config::Config;
pub use error::{Result, Socks5Error};
pub use protocol::{Command, ReplyStatus};
pub use server::{
    AuthHandler, Connection, Decider, Decision, Destination, DirectRelay, Listener,
    ListenerStats, Metadata, RelayHandler, RelaySession, RulesetValidator, Socks5Server,
    Verdict,
};
