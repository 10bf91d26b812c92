//! Relay configuration: TOML file + CLI overrides.

use crate::info::RelayInformation;
use nrelay_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub info: InfoSection,
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this relay; enables NIP-42 auth when set.
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_ping_period")]
    pub ping_period_secs: u64,
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,
    /// Send `["AUTH", challenge]` to every new connection.
    #[serde(default)]
    pub announce_auth: bool,
    /// Cap on events held by the in-memory store; unlimited when unset.
    #[serde(default)]
    pub max_events: Option<usize>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            service_url: None,
            max_message_size: default_max_message_size(),
            ping_period_secs: default_ping_period(),
            pong_wait_secs: default_pong_wait(),
            announce_auth: false,
            max_events: None,
        }
    }
}

/// `[info]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub software: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7447
}
fn default_max_message_size() -> usize {
    512_000
}
fn default_ping_period() -> u64 {
    30
}
fn default_pong_wait() -> u64 {
    60
}

/// Resolved relay configuration (CLI overrides applied, defaults filled in).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    pub service_url: Option<String>,
    pub max_message_size: usize,
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub announce_auth: bool,
    pub max_events: Option<usize>,
    pub info: RelayInformation,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl RelayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
        cli_service_url: Option<&str>,
        cli_max_message_size: Option<usize>,
    ) -> RelayResult<Self> {
        let mut file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        // Merge CLI overrides
        if let Some(bind) = cli_bind {
            file_config.relay.bind = bind.to_string();
        }
        if let Some(port) = cli_port {
            file_config.relay.port = port;
        }
        if let Some(url) = cli_service_url {
            file_config.relay.service_url = Some(url.to_string());
        }
        if let Some(size) = cli_max_message_size {
            file_config.relay.max_message_size = size;
        }

        let config = Self::from_file(file_config);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        let relay = file.relay;
        Self {
            bind: relay.bind,
            port: relay.port,
            service_url: relay.service_url.filter(|u| !u.is_empty()),
            max_message_size: relay.max_message_size,
            ping_period: Duration::from_secs(relay.ping_period_secs),
            pong_wait: Duration::from_secs(relay.pong_wait_secs),
            announce_auth: relay.announce_auth,
            max_events: relay.max_events,
            info: RelayInformation {
                name: file.info.name,
                description: file.info.description,
                pubkey: file.info.pubkey,
                contact: file.info.contact,
                supported_nips: vec![1, 9, 11, 42, 45],
                software: file
                    .info
                    .software
                    .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
                version: file
                    .info
                    .version
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            },
        }
    }

    /// A pong must be able to arrive before the read deadline lapses.
    pub fn validate(&self) -> RelayResult<()> {
        if self.ping_period.is_zero() {
            return Err(RelayError::Other("ping period must be non-zero".into()));
        }
        if self.pong_wait <= self.ping_period {
            return Err(RelayError::Other(format!(
                "pong wait ({}s) must exceed ping period ({}s)",
                self.pong_wait.as_secs(),
                self.ping_period.as_secs()
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| RelayError::Other(format!("invalid address: {e}")))
    }
}

fn parse_config(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| RelayError::Other(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 7447);
        assert_eq!(config.ping_period, Duration::from_secs(30));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert!(config.service_url.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap().port(), 7447);
    }

    #[test]
    fn parses_sections() {
        let file = parse_config(
            r#"
            [relay]
            port = 9000
            service_url = "wss://relay.example.com"
            announce_auth = true
            max_events = 1000

            [info]
            name = "example"
            "#,
        )
        .unwrap();
        let config = RelayConfig::from_file(file);
        assert_eq!(config.port, 9000);
        assert_eq!(config.service_url.as_deref(), Some("wss://relay.example.com"));
        assert!(config.announce_auth);
        assert_eq!(config.max_events, Some(1000));
        assert_eq!(config.info.name, "example");
        assert_eq!(config.max_message_size, 512_000);
    }

    #[test]
    fn missing_file_uses_defaults_and_cli_wins() {
        let config = RelayConfig::load(
            Some(Path::new("/nonexistent/nrelay.toml")),
            Some("127.0.0.1"),
            Some(8080),
            Some("ws://localhost:8080"),
            None,
        )
        .unwrap();
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.service_url.as_deref(), Some("ws://localhost:8080"));
    }

    #[test]
    fn rejects_pong_wait_not_exceeding_ping_period() {
        let mut config = RelayConfig::default();
        config.pong_wait = config.ping_period;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(parse_config("[relay\nport = 1").is_err());
    }
}
