//! Server configuration: TOML file + CLI overrides.

use crate::error::{ServerError, ServerResult};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub players: Vec<PlayerSection>,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_notification_queue")]
    pub notification_queue: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub request_logs: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            socket_path: default_socket_path(),
            idle_timeout: default_idle_timeout(),
            notification_queue: default_notification_queue(),
            max_frame_bytes: default_max_frame_bytes(),
            request_logs: false,
        }
    }
}

/// One `[[players]]` entry: an account served by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerSection {
    pub login_id: String,
    pub username: String,
    #[serde(default)]
    pub player_id: Option<String>,
}

impl PlayerSection {
    /// The player id the store assigns: `player_id` if set, else the username.
    pub fn resolved_player_id(&self) -> &str {
        self.player_id.as_deref().unwrap_or(&self.username)
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    8080
}
fn default_socket_path() -> String {
    "/socket".to_string()
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_notification_queue() -> usize {
    32
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub socket_path: String,
    /// Seconds without an inbound frame before a session is closed; 0 disables.
    pub idle_timeout: u64,
    pub notification_queue: usize,
    pub max_frame_bytes: usize,
    pub request_logs: bool,
    pub players: Vec<PlayerSection>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<IpAddr>,
        cli_port: Option<u16>,
        cli_idle_timeout: Option<u64>,
        cli_request_logs: bool,
    ) -> ServerResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_file(file_config);

        // Merge CLI overrides
        if let Some(bind) = cli_bind {
            config.bind = bind;
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        if let Some(idle) = cli_idle_timeout {
            config.idle_timeout = idle;
        }
        config.request_logs |= cli_request_logs;

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from TOML text without touching the filesystem.
    pub fn from_toml_str(content: &str) -> ServerResult<Self> {
        let config = Self::from_file(parse_config_file(content)?);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            bind: file.server.bind,
            port: file.server.port,
            socket_path: file.server.socket_path,
            idle_timeout: file.server.idle_timeout,
            notification_queue: file.server.notification_queue,
            max_frame_bytes: file.server.max_frame_bytes,
            request_logs: file.server.request_logs,
            players: file.players,
        }
    }

    fn validate(&self) -> ServerResult<()> {
        if !self.socket_path.starts_with('/') {
            return Err(ServerError::Config(format!(
                "socket_path must start with '/': {:?}",
                self.socket_path
            )));
        }
        if self.notification_queue == 0 {
            return Err(ServerError::Config(
                "notification_queue must be at least 1".into(),
            ));
        }
        let mut logins = HashSet::new();
        let mut usernames = HashSet::new();
        let mut player_ids = HashSet::new();
        for player in &self.players {
            if !logins.insert(player.login_id.as_str()) {
                return Err(ServerError::Config(format!(
                    "duplicate login_id for player {:?}",
                    player.username
                )));
            }
            if !usernames.insert(player.username.as_str()) {
                return Err(ServerError::Config(format!(
                    "duplicate username {:?}",
                    player.username
                )));
            }
            if !player_ids.insert(player.resolved_player_id()) {
                return Err(ServerError::Config(format!(
                    "player {:?} resolves to player_id {:?}, which is already taken",
                    player.username,
                    player.resolved_player_id()
                )));
            }
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

fn parse_config_file(content: &str) -> ServerResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| ServerError::Config(format!("config parse error: {e}")))
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
    fn defaults_when_empty() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.socket_path, "/socket");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(600)));
        assert!(config.players.is_empty());
    }

    #[test]
    fn parses_players_and_server_section() {
        let config = ServerConfig::from_toml_str(
            r#"
            [server]
            port = 9000
            idle_timeout = 0
            request_logs = true

            [[players]]
            login_id = "secret-a"
            username = "alice"

            [[players]]
            login_id = "secret-b"
            username = "bob"
            player_id = "p-bob"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.idle_timeout(), None);
        assert!(config.request_logs);
        assert_eq!(config.players.len(), 2);
        assert_eq!(config.players[1].player_id.as_deref(), Some("p-bob"));
    }

    #[test]
    fn rejects_duplicate_login_ids() {
        let err = ServerConfig::from_toml_str(
            r#"
            [[players]]
            login_id = "same"
            username = "alice"

            [[players]]
            login_id = "same"
            username = "bob"
            "#,
        );
        assert!(matches!(err, Err(ServerError::Config(_))));
    }

    #[test]
    fn rejects_duplicate_usernames() {
        let err = ServerConfig::from_toml_str(
            r#"
            [[players]]
            login_id = "a1"
            username = "bob"
            player_id = "p1"

            [[players]]
            login_id = "a2"
            username = "bob"
            player_id = "p2"
            "#,
        );
        match err {
            Err(ServerError::Config(msg)) => assert!(msg.contains("duplicate username")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_explicit_player_id_collision() {
        let err = ServerConfig::from_toml_str(
            r#"
            [[players]]
            login_id = "a1"
            username = "bob"
            player_id = "p1"

            [[players]]
            login_id = "a3"
            username = "carol"
            player_id = "p1"
            "#,
        );
        match err {
            Err(ServerError::Config(msg)) => assert!(msg.contains("\"p1\"")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_player_id_colliding_with_default() {
        // carol's explicit id equals bob's username-derived id.
        let err = ServerConfig::from_toml_str(
            r#"
            [[players]]
            login_id = "a1"
            username = "bob"

            [[players]]
            login_id = "a2"
            username = "carol"
            player_id = "bob"
            "#,
        );
        assert!(matches!(err, Err(ServerError::Config(_))));
    }

    #[test]
    fn resolved_player_id_defaults_to_username() {
        let player = PlayerSection {
            login_id: "x".into(),
            username: "dana".into(),
            player_id: None,
        };
        assert_eq!(player.resolved_player_id(), "dana");
    }

    #[test]
    fn rejects_relative_socket_path() {
        let err = ServerConfig::from_toml_str("[server]\nsocket_path = \"socket\"\n");
        assert!(matches!(err, Err(ServerError::Config(_))));
    }

    #[test]
    fn missing_file_uses_defaults_and_cli_overrides() {
        let missing = Path::new("/nonexistent/uttt/config.toml");
        let config = ServerConfig::load(Some(missing), None, Some(1234), Some(5), true).unwrap();
        assert_eq!(config.port, 1234);
        assert_eq!(config.idle_timeout, 5);
        assert!(config.request_logs);
    }
}
