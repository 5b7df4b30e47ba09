//! Environment-driven server configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime settings, each overridable through a `GREENROOM_*` variable.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Path to the libsql database file, or `:memory:`.
    pub database_path: String,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
    /// Open sockets allowed per user.
    pub max_connections_per_user: usize,
    /// Outbound frame buffer per socket.
    pub ws_channel_capacity: usize,
    /// How long a fresh socket may sit unauthenticated.
    pub ws_auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4100,
            database_path: "greenroom.db".to_string(),
            cors_origins: Vec::new(),
            max_connections_per_user: 8,
            ws_channel_capacity: 64,
            ws_auth_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cors_origins = std::env::var("GREENROOM_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: std::env::var("GREENROOM_HOST").unwrap_or(defaults.host),
            port: parsed_var("GREENROOM_PORT")?.unwrap_or(defaults.port),
            database_path: std::env::var("GREENROOM_DATABASE").unwrap_or(defaults.database_path),
            cors_origins,
            max_connections_per_user: parsed_var("GREENROOM_MAX_CONNECTIONS_PER_USER")?
                .unwrap_or(defaults.max_connections_per_user),
            ws_channel_capacity: parsed_var("GREENROOM_WS_CHANNEL_CAPACITY")?
                .unwrap_or(defaults.ws_channel_capacity),
            ws_auth_timeout: parsed_var("GREENROOM_WS_AUTH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ws_auth_timeout),
        })
    }

    /// `host:port` string for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed_var<T>(name: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse()
                .with_context(|| format!("{name} must be a number, got {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
