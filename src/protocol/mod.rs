//! SOCKS5 wire protocol constants and message builders.
//!
//! Byte-exact values from RFC 1928 (SOCKS5) and RFC 1929 (username/password
//! subnegotiation). Replies always carry the null IPv4 bound address
//! (`0.0.0.0:0`); the engine never reports a real bound address.

mod address;

pub use address::{render_domain, render_ipv4, render_ipv6};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Socks5Error;

// SOCKS5 protocol constants
pub const SOCKS5_VERSION: u8 = 0x05;
pub const USERPASS_VERSION: u8 = 0x01;

pub const AUTH_METHOD_NONE: u8 = 0x00;
pub const AUTH_METHOD_USERPASS: u8 = 0x02;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

pub const USERPASS_SUCCESS: u8 = 0x00;
pub const USERPASS_FAILURE: u8 = 0x01;

/// Upper bound on the method count accepted in a greeting.
pub const MAX_AUTH_METHODS: u8 = 128;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Length of every reply frame the engine sends.
pub const REPLY_LEN: usize = 10;

/// SOCKS5 request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Connect = 1,
    Bind = 2,
    Udp = 3,
}

impl Command {
    /// Map a wire command byte; `None` for anything outside 1..=3.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Command::Connect),
            2 => Some(Command::Bind),
            3 => Some(Command::Udp),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::Bind => "bind",
            Command::Udp => "udp",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = Socks5Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Command::Connect),
            "bind" => Ok(Command::Bind),
            "udp" => Ok(Command::Udp),
            other => Err(Socks5Error::Config(format!(
                "Unknown command '{}'. Must be 'connect', 'bind' or 'udp'",
                other
            ))),
        }
    }
}

/// SOCKS5 reply status (the REP field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    RequestGranted = 0,
    GeneralFailure = 1,
    ConnectionNotAllowed = 2,
    NetworkUnreachable = 3,
    HostUnreachable = 4,
    ConnectionRefused = 5,
    TtlExpired = 6,
    CommandNotSupported = 7,
    AddressTypeNotSupported = 8,
}

impl ReplyStatus {
    pub const ALL: [ReplyStatus; 9] = [
        ReplyStatus::RequestGranted,
        ReplyStatus::GeneralFailure,
        ReplyStatus::ConnectionNotAllowed,
        ReplyStatus::NetworkUnreachable,
        ReplyStatus::HostUnreachable,
        ReplyStatus::ConnectionRefused,
        ReplyStatus::TtlExpired,
        ReplyStatus::CommandNotSupported,
        ReplyStatus::AddressTypeNotSupported,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Canonical upper-case status name, e.g. `HOST_UNREACHABLE`.
    pub fn name(self) -> &'static str {
        match self {
            ReplyStatus::RequestGranted => "REQUEST_GRANTED",
            ReplyStatus::GeneralFailure => "GENERAL_FAILURE",
            ReplyStatus::ConnectionNotAllowed => "CONNECTION_NOT_ALLOWED",
            ReplyStatus::NetworkUnreachable => "NETWORK_UNREACHABLE",
            ReplyStatus::HostUnreachable => "HOST_UNREACHABLE",
            ReplyStatus::ConnectionRefused => "CONNECTION_REFUSED",
            ReplyStatus::TtlExpired => "TTL_EXPIRED",
            ReplyStatus::CommandNotSupported => "COMMAND_NOT_SUPPORTED",
            ReplyStatus::AddressTypeNotSupported => "ADDRESS_TYPE_NOT_SUPPORTED",
        }
    }

    pub fn is_success(self) -> bool {
        self == ReplyStatus::RequestGranted
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReplyStatus {
    type Err = Socks5Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReplyStatus::ALL
            .iter()
            .copied()
            .find(|status| status.name() == s)
            .ok_or_else(|| Socks5Error::UnknownStatus(s.to_string()))
    }
}

/// Server method selection: `[VER, METHOD]`.
pub fn method_selection(method: u8) -> [u8; 2] {
    [SOCKS5_VERSION, method]
}

/// Username/password subnegotiation response: `[0x01, STATUS]`.
pub fn userpass_response(accepted: bool) -> [u8; 2] {
    let status = if accepted {
        USERPASS_SUCCESS
    } else {
        USERPASS_FAILURE
    };
    [USERPASS_VERSION, status]
}

/// Request reply with the null bound address.
/// Format: [VER=0x05, REP, RSV=0x00, ATYP=0x01, BND.ADDR=0x00000000, BND.PORT=0x0000]
pub fn reply(status: ReplyStatus) -> [u8; REPLY_LEN] {
    [
        SOCKS5_VERSION,
        status.code(),
        0x00,      // Reserved
        ATYP_IPV4, // Address type
        0,
        0,
        0,
        0, // BND.ADDR
        0,
        0, // BND.PORT
    ]
}
