//! SOCKS5 server: frame reader, handshake state machine, hook registry,
//! relay handlers and the TCP listener.

pub mod connection;
pub mod decision;
pub mod frame_reader;
mod handler;
pub mod listener;
pub mod registry;
pub mod relay;

pub use connection::{Connection, ConnectionState, Destination, Metadata};
pub use decision::{AuthHandler, Decider, Decision, RulesetValidator, Verdict};
pub use frame_reader::FrameReader;
pub use listener::{Listener, ListenerStats};
pub use registry::Socks5Server;
pub use relay::{
    map_connect_error, splice, AsyncStream, BoxedStream, ClientStream, DirectRelay,
    RelayHandler, RelaySession,
};
