//! Configuration module for socks5-proxy
//!
//! ```yaml
//! server:
//!   listen_address: "0.0.0.0"
//!   listen_port: 1080
//!   max_connections: 1000
//!   connect_timeout_secs: 30
//!
//! auth:
//!   username: "proxy"
//!   password: "${SOCKS5_PASSWORD}"
//!
//! supported_commands: [connect]
//!
//! logging:
//!   level: info
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::*;
