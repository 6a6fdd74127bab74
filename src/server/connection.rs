//! Per-connection data exposed to decision hooks and relay handlers.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use zeroize::Zeroizing;

use crate::protocol::Command;

/// Open key-value store for collaborator data. The core never reads it.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Parsed request target. Address, port and command are always set together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Dotted IPv4, uncompressed lowercase IPv6, or domain name
    pub address: String,
    pub port: u16,
    pub command: Command,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Handshake progress of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Greeting,
    Authenticating,
    Requesting,
    Validating,
    Relaying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Greeting => "greeting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Requesting => "requesting",
            ConnectionState::Validating => "validating",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State of one accepted client stream.
///
/// Credentials are only present when user/password auth was negotiated,
/// and the destination only once the request has been fully parsed.
pub struct Connection {
    id: u64,
    peer_addr: Option<SocketAddr>,
    username: Option<String>,
    password: Option<Zeroizing<String>>,
    destination: Option<Destination>,
    metadata: Metadata,
}

impl Connection {
    pub fn new(id: u64, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer_addr,
            username: None,
            password: None,
            destination: None,
            metadata: Metadata::new(),
        }
    }

    /// Server-unique connection id, used in log lines.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.as_str())
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn destination_address(&self) -> Option<&str> {
        self.destination.as_ref().map(|d| d.address.as_str())
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.destination.as_ref().map(|d| d.port)
    }

    pub fn command(&self) -> Option<Command> {
        self.destination.as_ref().map(|d| d.command)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub(crate) fn set_credentials(&mut self, username: String, password: String) {
        self.username = Some(username);
        self.password = Some(Zeroizing::new(password));
    }

    pub(crate) fn set_destination(&mut self, destination: Destination) {
        self.destination = Some(destination);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("destination", &self.destination)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_is_set_atomically() {
        let mut conn = Connection::new(7, None);
        assert!(conn.destination_address().is_none());
        assert!(conn.destination_port().is_none());
        assert!(conn.command().is_none());

        conn.set_destination(Destination {
            address: "example.com".into(),
            port: 443,
            command: Command::Connect,
        });
        assert_eq!(conn.destination_address(), Some("example.com"));
        assert_eq!(conn.destination_port(), Some(443));
        assert_eq!(conn.command(), Some(Command::Connect));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut conn = Connection::new(1, None);
        conn.set_credentials("alice".into(), "hunter2".into());
        assert_eq!(conn.password(), Some("hunter2"));

        let debug = format!("{:?}", conn);
        assert!(debug.contains("alice"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_destination_display() {
        let v4 = Destination {
            address: "10.0.0.1".into(),
            port: 80,
            command: Command::Connect,
        };
        assert_eq!(v4.to_string(), "10.0.0.1:80");

        let v6 = Destination {
            address: "0000:0000:0000:0000:0000:0000:0000:0001".into(),
            port: 8080,
            command: Command::Connect,
        };
        assert_eq!(
            v6.to_string(),
            "[0000:0000:0000:0000:0000:0000:0000:0001]:8080"
        );
    }

    #[test]
    fn test_metadata_is_open() {
        let mut conn = Connection::new(1, None);
        conn.metadata_mut()
            .insert("tenant".into(), serde_json::json!({"id": 42}));
        assert_eq!(conn.metadata()["tenant"]["id"], 42);
    }
}
