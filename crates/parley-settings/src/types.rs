//! Settings types with compiled defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleySettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    /// Insert the two demo accounts on startup if they are missing.
    pub seed_demo_users: bool,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            database: DatabaseSettings::default(),
            logging: LoggingSettings::default(),
            seed_demo_users: true,
        }
    }
}

impl ParleySettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.max_send_queue must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeat_timeout_secs ({}) is shorter than the ping interval ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "auth.token_ttl_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP + WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    /// `0` asks the OS for a free port.
    pub port: u16,
    /// Outbound queue capacity per connection. Pushes beyond it are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Close a connection that has shown no pong or other activity for this long.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4001,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret. Empty means "generate one per process".
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: parley_home().join("parley.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// `~/.parley`, falling back to `/tmp/.parley` without a home directory.
pub fn parley_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ParleySettings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 4001);
        assert_eq!(settings.server.max_send_queue, 256);
        assert_eq!(settings.auth.token_ttl_secs, 900);
        assert!(settings.auth.jwt_secret.is_empty());
        assert_eq!(settings.logging.level, "info");
        assert!(settings.seed_demo_users);
        assert!(settings.database.path.ends_with(".parley/parley.db"));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(ParleySettings::default().validate().is_ok());
    }

    #[test]
    fn zero_queue_is_invalid() {
        let mut settings = ParleySettings::default();
        settings.server.max_send_queue = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn timeout_shorter_than_interval_is_invalid() {
        let mut settings = ParleySettings::default();
        settings.server.heartbeat_interval_secs = 60;
        settings.server.heartbeat_timeout_secs = 30;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_secs"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ParleySettings = serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.auth.token_ttl_secs, 900);
    }
}
