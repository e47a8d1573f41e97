// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// Engine Unix socket path.
    pub docker_socket: PathBuf,
    /// Name prefix for every managed game container.
    pub container_prefix: String,
    /// Compose project name of the panel's own infrastructure containers.
    pub compose_project: String,
    /// HTTP bind address.
    pub http_addr: SocketAddr,
    /// Shared secret for the bot principal (`X-Bot-Api-Key`).
    pub bot_api_key: String,
    /// Discord bot token for channel notifications, if configured.
    pub discord_bot_token: Option<String>,
    /// Webhook fallback URL for notifications, if configured.
    pub webhook_url: Option<String>,
    /// Data directory (banners live here; disk stats sample it).
    pub data_dir: PathBuf,
    /// Host-side root that game /data/ volumes live under.
    pub host_data_dir: PathBuf,
    /// Root of the backup archive tree.
    pub backup_root: PathBuf,
    /// Public origin allowed by CORS, if restricted.
    pub public_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_api_key =
            std::env::var("BOT_API_KEY").map_err(|_| ConfigError::MissingEnvVar("BOT_API_KEY"))?;

        let port: u16 = std::env::var("GAMEDOCK_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        Ok(Self {
            database_path: PathBuf::from(
                std::env::var("GAMEDOCK_DATABASE_PATH")
                    .unwrap_or_else(|_| ".data/gamedock.db".to_string()),
            ),
            docker_socket: PathBuf::from(
                std::env::var("DOCKER_SOCKET")
                    .unwrap_or_else(|_| "/var/run/docker.sock".to_string()),
            ),
            container_prefix: std::env::var("GAME_CONTAINER_PREFIX")
                .unwrap_or_else(|_| "game-panel-".to_string()),
            compose_project: std::env::var("COMPOSE_PROJECT")
                .unwrap_or_else(|_| "game-panel".to_string()),
            http_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            bot_api_key,
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            webhook_url: std::env::var("DISCORD_WEBHOOK_URL").ok(),
            data_dir: PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "/data".to_string())),
            host_data_dir: PathBuf::from(
                std::env::var("HOST_DATA_DIR").unwrap_or_else(|_| "/host-data".to_string()),
            ),
            backup_root: PathBuf::from(
                std::env::var("BACKUP_ROOT").unwrap_or_else(|_| "/backups".to_string()),
            ),
            public_url: std::env::var("PUBLIC_URL").ok(),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("BOT_API_KEY", "secret");
        guard.remove("GAMEDOCK_HTTP_PORT");
        guard.remove("GAME_CONTAINER_PREFIX");
        guard.remove("DOCKER_SOCKET");
        guard.remove("BACKUP_ROOT");
        guard.remove("DATA_DIR");
        guard.remove("HOST_DATA_DIR");
        guard.remove("PUBLIC_URL");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.container_prefix, "game-panel-");
        assert_eq!(config.docker_socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(config.backup_root, PathBuf::from("/backups"));
        assert_eq!(config.host_data_dir, PathBuf::from("/host-data"));
        assert!(config.public_url.is_none());
    }

    #[test]
    fn test_config_missing_bot_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("BOT_API_KEY");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::MissingEnvVar("BOT_API_KEY")
        ));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("BOT_API_KEY", "secret");
        guard.set("GAMEDOCK_HTTP_PORT", "not_a_number");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidPort
        ));
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("BOT_API_KEY", "secret");
        guard.set("GAMEDOCK_HTTP_PORT", "9000");
        guard.set("GAME_CONTAINER_PREFIX", "play-");
        guard.set("PUBLIC_URL", "https://panel.aypapol.com");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.container_prefix, "play-");
        assert_eq!(config.public_url.as_deref(), Some("https://panel.aypapol.com"));
    }
}
