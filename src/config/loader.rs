//! Configuration loader

use std::path::Path;

use super::{Config, CredentialsConfig};
use crate::error::{Result, Socks5Error};

const ENV_PREFIX: &str = "SOCKS5_PROXY_";

/// Load configuration from a YAML file
///
/// Also applies SOCKS5_PROXY_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies SOCKS5_PROXY_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(Socks5Error::Config)?;
    Ok(config)
}

/// Apply SOCKS5_PROXY_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `SOCKS5_PROXY_LISTEN_ADDRESS` - Override listen address
/// - `SOCKS5_PROXY_LISTEN_PORT` - Override listen port
/// - `SOCKS5_PROXY_MAX_CONNECTIONS` - Override max connections
/// - `SOCKS5_PROXY_CONNECT_TIMEOUT_SECS` - Override dial timeout
/// - `SOCKS5_PROXY_USERNAME` / `SOCKS5_PROXY_PASSWORD` - Set credentials
///   (both required to enable auth when the file has none)
/// - `SOCKS5_PROXY_LOG_LEVEL` - Override log level
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

    if let Some(val) = var("LISTEN_ADDRESS") {
        debug!("Overriding listen_address from {}LISTEN_ADDRESS", ENV_PREFIX);
        config.server.listen_address = val;
    }
    if let Some(port) = var("LISTEN_PORT").and_then(|v| v.parse::<u16>().ok()) {
        debug!("Overriding listen_port from {}LISTEN_PORT", ENV_PREFIX);
        config.server.listen_port = port;
    }
    if let Some(max) = var("MAX_CONNECTIONS").and_then(|v| v.parse::<usize>().ok()) {
        debug!("Overriding max_connections from {}MAX_CONNECTIONS", ENV_PREFIX);
        config.server.max_connections = max;
    }
    if let Some(secs) = var("CONNECT_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        debug!(
            "Overriding connect_timeout from {}CONNECT_TIMEOUT_SECS",
            ENV_PREFIX
        );
        config.server.connect_timeout_secs = secs;
    }

    let username = var("USERNAME");
    let password = var("PASSWORD");
    if let Some(ref mut auth) = config.auth {
        if let Some(username) = username {
            debug!("Overriding auth username from {}USERNAME", ENV_PREFIX);
            auth.username = username;
        }
        if let Some(password) = password {
            debug!("Overriding auth password from {}PASSWORD", ENV_PREFIX);
            auth.password = password;
        }
    } else if let (Some(username), Some(password)) = (username, password) {
        debug!("Enabling auth from {}USERNAME/PASSWORD", ENV_PREFIX);
        config.auth = Some(CredentialsConfig { username, password });
    }

    if let Some(val) = var("LOG_LEVEL") {
        debug!("Overriding log level from {}LOG_LEVEL", ENV_PREFIX);
        config.logging.level = val;
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (whole value must be the reference)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    let var_name = if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}'))
    {
        inner
    } else if value.len() > 1 && value.starts_with('$') && !value.contains(' ') {
        &value[1..]
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    if let Some(ref mut auth) = config.auth {
        auth.username = resolve_env_var(&auth.username);
        auth.password = resolve_env_var(&auth.password);
    }
    config.server.listen_address = resolve_env_var(&config.server.listen_address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use std::collections::HashMap;

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
server:
  listen_port: 1081
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.server.listen_port, 1081);
        assert_eq!(config.server.listen_address, "127.0.0.1"); // default
        assert_eq!(config.server.connect_timeout_secs, 30);
        assert!(config.server.nodelay);
        assert_eq!(config.supported_commands, vec![Command::Connect]);
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_load_config_full() {
        let yaml = r#"
server:
  listen_address: 0.0.0.0
  listen_port: 9050
  max_connections: 0
  connect_timeout_secs: 5
  idle_timeout_secs: 300
  nodelay: false

auth:
  username: proxy
  password: secret

supported_commands: [connect, udp]

logging:
  level: debug
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert_eq!(config.server.max_connections, 0);
        assert_eq!(config.server.idle_timeout_secs, 300);
        assert!(!config.server.nodelay);
        let auth = config.auth.as_ref().unwrap();
        assert_eq!(auth.username, "proxy");
        assert_eq!(auth.password, "secret");
        assert_eq!(
            config.supported_commands,
            vec![Command::Connect, Command::Udp]
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let yaml = "supported_commands: [connect, associate]\n";
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(matches!(err, Socks5Error::Config(_)));
    }

    #[test]
    fn test_overlong_username_rejected() {
        let yaml = format!("auth:\n  username: {}\n  password: x\n", "a".repeat(300));
        assert!(load_config_from_str(&yaml).is_err());
    }

    #[test]
    fn test_resolve_env_var() {
        std::env::set_var("SOCKS5_TEST_RESOLVE_PASSWORD", "from-env");
        assert_eq!(resolve_env_var("${SOCKS5_TEST_RESOLVE_PASSWORD}"), "from-env");
        assert_eq!(resolve_env_var("$SOCKS5_TEST_RESOLVE_PASSWORD"), "from-env");
        assert_eq!(
            resolve_env_var("${SOCKS5_TEST_RESOLVE_UNSET_VAR}"),
            "${SOCKS5_TEST_RESOLVE_UNSET_VAR}"
        );
        assert_eq!(resolve_env_var("plain"), "plain");
        assert_eq!(resolve_env_var("$"), "$");
        assert_eq!(resolve_env_var("$not a var"), "$not a var");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SOCKS5_PROXY_LISTEN_ADDRESS", "0.0.0.0"),
            ("SOCKS5_PROXY_LISTEN_PORT", "1999"),
            ("SOCKS5_PROXY_MAX_CONNECTIONS", "not-a-number"),
            ("SOCKS5_PROXY_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert_eq!(config.server.listen_port, 1999);
        // Unparseable values are ignored
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_credential_overrides() {
        let both: HashMap<&str, &str> = [
            ("SOCKS5_PROXY_USERNAME", "alice"),
            ("SOCKS5_PROXY_PASSWORD", "pw"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_overrides(&mut config, |name| both.get(name).map(|v| v.to_string()));
        assert_eq!(config.auth.as_ref().unwrap().username, "alice");

        // A lone username cannot enable auth
        let mut config = Config::default();
        apply_overrides(&mut config, |name| {
            (name == "SOCKS5_PROXY_USERNAME").then(|| "bob".to_string())
        });
        assert!(config.auth.is_none());

        // But it can replace a configured one
        let mut config = Config::default();
        config.auth = Some(CredentialsConfig {
            username: "old".into(),
            password: "pw".into(),
        });
        apply_overrides(&mut config, |name| {
            (name == "SOCKS5_PROXY_USERNAME").then(|| "bob".to_string())
        });
        let auth = config.auth.as_ref().unwrap();
        assert_eq!(auth.username, "bob");
        assert_eq!(auth.password, "pw");
    }
}
