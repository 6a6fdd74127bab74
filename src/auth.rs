//! Static user/password authentication.
//!
//! [`StaticCredentials`] is the auth handler wired by
//! [`Socks5Server::from_config`](crate::Socks5Server::from_config) when the
//! configuration carries an `auth` section. It accepts exactly one
//! username/password pair.

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::config::CredentialsConfig;
use crate::server::{AuthHandler, Connection, Decider, Decision};

/// Auth handler accepting a single fixed username and password.
pub struct StaticCredentials {
    username: String,
    password: Zeroizing<String>,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(config.username.clone(), config.password.clone())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check a presented username/password pair.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

#[async_trait]
impl AuthHandler for StaticCredentials {
    async fn authenticate(&self, connection: &mut Connection, _decider: Decider) -> Decision {
        match (connection.username(), connection.password()) {
            (Some(username), Some(password)) => self.verify(username, password).into(),
            _ => Decision::Deny,
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let creds = StaticCredentials::new("alice", "wonderland");
        assert!(creds.verify("alice", "wonderland"));
        assert!(!creds.verify("alice", "wonderlan"));
        assert!(!creds.verify("bob", "wonderland"));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = StaticCredentials::new("alice", "wonderland");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("wonderland"));
    }
}
