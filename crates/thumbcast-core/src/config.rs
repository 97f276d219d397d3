//! Configuration resolution for Thumbcast.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (JSON, passed with `--config`)
//! 3. Environment variables (`THUMBCAST_*`)
//! 4. CLI arguments (highest priority, applied by each binary)

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::channel::Channel;
use crate::error::{Error, Result};

/// Complete Thumbcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub bus: BusConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Path of the event-stream endpoint.
    pub stream_path: String,
    /// Channel every stream session subscribes to.
    pub channel: Channel,
    /// Interval between keep-alive comments. Zero disables them.
    pub keep_alive_secs: u64,
    /// Frames buffered per session before `forward` waits on the client.
    pub session_buffer: usize,
    /// How long shutdown waits for open sessions to finish teardown.
    pub shutdown_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            stream_path: "/api/subscribe".to_string(),
            channel: Channel::default(),
            keep_alive_secs: 15,
            session_buffer: 32,
            shutdown_grace_secs: 5,
        }
    }
}

impl RelayConfig {
    pub const fn keep_alive(&self) -> Option<Duration> {
        if self.keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keep_alive_secs))
        }
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Message bus connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BusConfig {
    /// Build a `redis://` connection URL, percent-encoding any credentials.
    pub fn connection_url(&self) -> Result<String> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut url = Url::parse(&format!("redis://{host}:{}", self.port)).map_err(|e| {
            Error::Config(format!(
                "Invalid bus address {}:{}: {e}",
                self.host, self.port
            ))
        })?;
        if let Some(username) = &self.username {
            url.set_username(username)
                .map_err(|()| Error::Config("Bus URL cannot carry a username".into()))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|()| Error::Config("Bus URL cannot carry a password".into()))?;
        }
        Ok(url.into())
    }

    /// `host:port` without credentials, for log lines.
    pub fn display_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.relay.stream_path.starts_with('/') {
            return Err(Error::Config(format!(
                "stream_path must start with '/', got {:?}",
                self.relay.stream_path
            )));
        }
        if self.relay.session_buffer == 0 {
            return Err(Error::Config("session_buffer must be at least 1".into()));
        }
        if self.bus.host.is_empty() {
            return Err(Error::Config("bus host must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicitly given settings file must exist. Environment overrides are
/// read from the process environment. The result is not validated: callers
/// apply their CLI flags first, then call [`Config::validate`].
pub fn load_config(settings_path: Option<&Path>) -> Result<Config> {
    let mut config = match settings_path {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `THUMBCAST_*` overrides using `lookup` to read variables.
///
/// Values that fail to parse are skipped with a warning.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("THUMBCAST_LISTEN_ADDR") {
        match val.parse() {
            Ok(addr) => config.relay.listen_addr = addr,
            Err(e) => warn!(value = %val, error = %e, "Ignoring THUMBCAST_LISTEN_ADDR"),
        }
    }
    if let Some(val) = lookup("THUMBCAST_STREAM_PATH") {
        config.relay.stream_path = val;
    }
    if let Some(val) = lookup("THUMBCAST_CHANNEL") {
        match Channel::new(&val) {
            Ok(channel) => config.relay.channel = channel,
            Err(e) => warn!(error = %e, "Ignoring THUMBCAST_CHANNEL"),
        }
    }
    if let Some(val) = lookup("THUMBCAST_BUS_HOST") {
        config.bus.host = val;
    }
    if let Some(val) = lookup("THUMBCAST_BUS_PORT") {
        match val.parse() {
            Ok(port) => config.bus.port = port,
            Err(e) => warn!(value = %val, error = %e, "Ignoring THUMBCAST_BUS_PORT"),
        }
    }
    if let Some(val) = lookup("THUMBCAST_BUS_USERNAME") {
        config.bus.username = Some(val);
    }
    if let Some(val) = lookup("THUMBCAST_BUS_PASSWORD") {
        config.bus.password = Some(val);
    }
}
