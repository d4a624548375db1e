use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use sfchat_session::endpoint::{DEFAULT_ADDRESS_RELAY, DEFAULT_DOMAIN_RELAY};
use sfchat_session::session::DEFAULT_USER_ID;
use sfchat_session::{RelayRoutes, SessionConfig};

// =============================================================================
// Tunables (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [session]
//                    connect_timeout_ms = 3000
//
//   env var:         SFCHAT_SESSION__CONNECT_TIMEOUT_MS=3000   (double underscore = nesting)

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Connection timing (lives under `[session]` in config.toml).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Delay before the automatic connect to the saved endpoint.
    #[serde(default = "default_startup_connect_delay_ms")]
    pub startup_connect_delay_ms: u64,
    /// Rejected passwords before background retries stop. 0 = never stop.
    #[serde(default)]
    pub auth_failure_limit: u32,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            startup_connect_delay_ms: default_startup_connect_delay_ms(),
            auth_failure_limit: 0,
        }
    }
}

/// Relay endpoints (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_domain_url")]
    pub domain_url: String,
    #[serde(default = "default_address_url")]
    pub address_url: String,
    /// Connect straight to `ws://host:port`, skipping the relay.
    #[serde(default)]
    pub direct: bool,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            domain_url: default_domain_url(),
            address_url: default_address_url(),
            direct: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFileConfig {
    /// Sent as `userQQ` when the settings don't name a user.
    #[serde(default = "default_user_id")]
    pub default_user_id: String,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            default_user_id: default_user_id(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_startup_connect_delay_ms() -> u64 {
    1_000
}

fn default_domain_url() -> String {
    DEFAULT_DOMAIN_RELAY.to_string()
}

fn default_address_url() -> String {
    DEFAULT_ADDRESS_RELAY.to_string()
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

impl FileConfig {
    /// Session tunables. `user_id` from settings wins over the configured default.
    pub fn session_config(&self, user_id: Option<&str>) -> SessionConfig {
        let user_id = user_id
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(self.client.default_user_id.as_str());
        SessionConfig {
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(self.session.reconnect_interval_ms),
            user_id: user_id.to_string(),
            routes: RelayRoutes {
                domain_relay: self.relay.domain_url.clone(),
                address_relay: self.relay.address_url.clone(),
                direct: self.relay.direct,
            },
            auth_failure_limit: (self.session.auth_failure_limit > 0)
                .then_some(self.session.auth_failure_limit),
        }
    }

    pub fn startup_connect_delay(&self) -> Duration {
        Duration::from_millis(self.session.startup_connect_delay_ms)
    }
}

/// Build the layered config: struct defaults, then `config.toml`, then
/// `SFCHAT_*` env vars.
///
///   `SFCHAT_RELAY__DIRECT=true`  →  `relay.direct = true`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SFCHAT_").split("__"))
}

// =============================================================================
// Directory layout (derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SfchatConfig {
    pub data_dir: PathBuf,
}

impl SfchatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".sfchat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        info!("Data directory: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.session.connect_timeout_ms, 5000);
        assert_eq!(fc.session.reconnect_interval_ms, 5000);
        assert_eq!(fc.session.startup_connect_delay_ms, 1000);
        assert_eq!(fc.session.auth_failure_limit, 0);
        assert_eq!(fc.relay.domain_url, "wss://hws.maliya.top/proxy");
        assert_eq!(fc.relay.address_url, "wss://sfws.maliy.top");
        assert!(!fc.relay.direct);
        assert_eq!(fc.client.default_user_id, "web_user");
    }

    #[test]
    fn test_session_config_from_defaults() {
        let sc = FileConfig::default().session_config(None);
        assert_eq!(sc, SessionConfig::default());
    }

    #[test]
    fn test_session_config_user_override() {
        let fc = FileConfig::default();
        assert_eq!(fc.session_config(Some(" 12345 ")).user_id, "12345");
        assert_eq!(fc.session_config(Some("")).user_id, "web_user");
    }

    #[test]
    fn test_auth_failure_limit_zero_is_unlimited() {
        let mut fc = FileConfig::default();
        assert_eq!(fc.session_config(None).auth_failure_limit, None);
        fc.session.auth_failure_limit = 3;
        assert_eq!(fc.session_config(None).auth_failure_limit, Some(3));
    }

    #[test]
    fn test_sfchat_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        let config = SfchatConfig::new(Some(nested.clone())).unwrap();
        assert!(nested.exists());
        assert_eq!(config.settings_path(), nested.join("settings.json"));
        assert_eq!(config.config_toml_path(), nested.join("config.toml"));
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc, FileConfig::default());
    }

    #[test]
    fn test_load_config_toml_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[session]\nconnect_timeout_ms = 1500\nauth_failure_limit = 5\n\n[relay]\ndirect = true\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.session.connect_timeout_ms, 1500);
        assert_eq!(fc.session.reconnect_interval_ms, 5000);
        assert!(fc.relay.direct);

        let sc = fc.session_config(None);
        assert_eq!(sc.connect_timeout, Duration::from_millis(1500));
        assert_eq!(sc.auth_failure_limit, Some(5));
        assert!(sc.routes.direct);
    }
}
