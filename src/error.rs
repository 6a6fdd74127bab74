//! Error types for socks5-proxy

use thiserror::Error;

use crate::protocol::Command;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// I/O error on the client or destination stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Greeting or request carried a version other than 5
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Greeting advertised zero or more than 128 methods
    #[error("Invalid authentication method count: {0}")]
    InvalidMethodCount(u8),

    /// Client did not offer the method the server requires
    #[error("No acceptable authentication method offered (required 0x{0:02x})")]
    NoAcceptableMethod(u8),

    /// Request command byte is not connect, bind or udp
    #[error("Unknown command: 0x{0:02x}")]
    UnknownCommand(u8),

    /// Request address type is not IPv4, domain or IPv6
    #[error("Unknown address type: 0x{0:02x}")]
    UnknownAddressType(u8),

    /// Command is valid but not enabled on this server
    #[error("Command not supported: {0}")]
    CommandNotSupported(Command),

    /// Auth handler denied the credentials
    #[error("Authentication denied for user '{0}'")]
    AuthDenied(String),

    /// Ruleset validator denied the request
    #[error("Request to {0} denied by ruleset")]
    RulesetDenied(String),

    /// A relay handler tried to answer with a status that does not exist
    #[error("\"{0}\" is not a valid status")]
    UnknownStatus(String),

    /// Relay stage failure, e.g. using the client stream after a failure reply
    #[error("Relay error: {0}")]
    Relay(String),
}

impl Socks5Error {
    /// True for programming mistakes in a collaborator (as opposed to
    /// anything a client can trigger). These must never be swallowed.
    pub fn is_internal(&self) -> bool {
        matches!(self, Socks5Error::UnknownStatus(_))
    }

    /// True for transport-level failures on the client stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, Socks5Error::Io(_))
    }
}

/// Result type alias for Socks5Error
pub type Result<T> = std::result::Result<T, Socks5Error>;

impl From<serde_yaml::Error> for Socks5Error {
    fn from(err: serde_yaml::Error) -> Self {
        Socks5Error::Config(err.to_string())
    }
}
