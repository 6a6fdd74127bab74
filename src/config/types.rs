//! Configuration types

use serde::Deserialize;

use crate::protocol::Command;

/// Longest username or password the subnegotiation can carry.
pub const MAX_CREDENTIAL_LEN: usize = 255;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener and relay settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Static user/password credentials. Absent means no authentication.
    #[serde(default)]
    pub auth: Option<CredentialsConfig>,

    /// Commands accepted in requests
    #[serde(default = "default_supported_commands")]
    pub supported_commands: Vec<Command>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: None,
            supported_commands: default_supported_commands(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_address.trim().is_empty() {
            return Err("server.listen_address must not be empty".to_string());
        }

        if let Some(ref auth) = self.auth {
            if auth.username.len() > MAX_CREDENTIAL_LEN {
                return Err(format!(
                    "auth.username is {} bytes, maximum is {}",
                    auth.username.len(),
                    MAX_CREDENTIAL_LEN
                ));
            }
            if auth.password.len() > MAX_CREDENTIAL_LEN {
                return Err(format!(
                    "auth.password is {} bytes, maximum is {}",
                    auth.password.len(),
                    MAX_CREDENTIAL_LEN
                ));
            }
        }

        Ok(())
    }

    /// Check if user/password authentication is configured
    pub fn has_credentials(&self) -> bool {
        self.auth.is_some()
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Port to listen on (0 = OS-assigned)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Maximum number of concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound dial timeout in seconds (0 = no explicit timeout)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Relay idle timeout in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout_secs: u64,
    /// Set TCP_NODELAY on client and destination sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: 0,
            nodelay: default_nodelay(),
        }
    }
}

/// Username and password clients must present
#[derive(Clone, Deserialize)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    1080
}

fn default_max_connections() -> usize {
    1000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_nodelay() -> bool {
    true
}

fn default_supported_commands() -> Vec<Command> {
    vec![Command::Connect]
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_credentials());
        assert_eq!(config.server.listen_port, 1080);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overlong_credentials_rejected() {
        let mut config = Config::default();
        config.auth = Some(CredentialsConfig {
            username: "u".repeat(256),
            password: "p".into(),
        });
        assert!(config.validate().unwrap_err().contains("auth.username"));

        config.auth = Some(CredentialsConfig {
            username: "u".into(),
            password: "p".repeat(255),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_listen_address_rejected() {
        let mut config = Config::default();
        config.server.listen_address = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = CredentialsConfig {
            username: "proxy".into(),
            password: "s3cret".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("s3cret"));
    }
}
