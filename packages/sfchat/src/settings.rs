//! Persisted client settings (`settings.json`).
//!
//! Key names match the browser client's saved settings so a file exported
//! from one can be dropped into the other.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sfchat_session::{Endpoint, Mode, PersistedState, SettingsSink};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "userQQ", default)]
    pub user_qq: String,
    #[serde(rename = "botQQ", default)]
    pub bot_qq: String,
    #[serde(default)]
    pub ws_password: String,
    #[serde(default = "default_show_avatar")]
    pub show_avatar: bool,
    /// Unix epoch milliseconds of the last save.
    #[serde(default)]
    pub last_update: Option<i64>,
}

fn default_show_avatar() -> bool {
    true
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: String::new(),
            mode: String::new(),
            user_qq: String::new(),
            bot_qq: String::new(),
            ws_password: String::new(),
            show_avatar: default_show_avatar(),
            last_update: None,
        }
    }
}

impl ClientSettings {
    /// Read settings; a missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring corrupt settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings: {:?}", path))
    }

    pub fn mode(&self) -> Mode {
        Mode::from_stored(&self.mode)
    }

    /// The saved endpoint, if the host is set. A bad port falls back to the default.
    pub fn endpoint(&self) -> Option<Endpoint> {
        if self.ip.trim().is_empty() {
            return None;
        }
        match Endpoint::parse(&self.ip, &self.port) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!("Saved port ignored: {}", e);
                Some(Endpoint::new(self.ip.as_str(), None))
            }
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            endpoint: self.endpoint(),
            mode: self.mode(),
            credential: self.ws_password.clone(),
            user_id: self.user_qq.trim().to_string(),
        }
    }

    /// Fold session state into these settings, keeping client-only fields.
    pub fn merge(&mut self, state: &PersistedState) {
        match &state.endpoint {
            Some(endpoint) => {
                self.ip = endpoint.host.clone();
                self.port = endpoint.port.map(|p| p.to_string()).unwrap_or_default();
            }
            None => {
                self.ip.clear();
                self.port.clear();
            }
        }
        self.mode = state.mode.as_str().to_string();
        self.ws_password = state.credential.clone();
        self.last_update = Some(Utc::now().timestamp_millis());
    }
}

/// File-backed [`SettingsSink`]; clones share the same in-memory copy.
#[derive(Clone)]
pub struct SettingsStore {
    path: PathBuf,
    current: Arc<Mutex<ClientSettings>>,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let settings = ClientSettings::load(&path);
        Self {
            path,
            current: Arc::new(Mutex::new(settings)),
        }
    }

    pub fn snapshot(&self) -> ClientSettings {
        match self.current.lock() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply `change` and write the result.
    pub fn update(&self, change: impl FnOnce(&mut ClientSettings)) -> Result<()> {
        let mut settings = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        change(&mut *settings);
        settings.save(&self.path)
    }
}

impl SettingsSink for SettingsStore {
    fn persist(&mut self, state: &PersistedState) -> Result<()> {
        self.update(|settings| settings.merge(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = ClientSettings::load(&tmp.path().join("settings.json"));
        assert_eq!(settings, ClientSettings::default());
        assert!(settings.show_avatar);
        assert_eq!(settings.mode(), Mode::Ss);
        assert!(settings.endpoint().is_none());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ClientSettings::load(&path), ClientSettings::default());
    }

    #[test]
    fn test_reads_browser_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"ip":"chat.example.com","port":"9000","mode":"gg","userQQ":"111",
                "botQQ":"222","wsPassword":"pw","showAvatar":false,"lastUpdate":1700000000000}"#,
        )
        .unwrap();
        let settings = ClientSettings::load(&path);
        assert_eq!(settings.bot_qq, "222");
        assert!(!settings.show_avatar);

        let state = settings.to_persisted();
        assert_eq!(state.endpoint, Some(Endpoint::new("chat.example.com", Some(9000))));
        assert_eq!(state.mode, Mode::Gg);
        assert_eq!(state.credential, "pw");
        assert_eq!(state.user_id, "111");
    }

    #[test]
    fn test_unknown_mode_and_bad_port() {
        let settings = ClientSettings {
            ip: "10.0.0.1".into(),
            port: "eighty".into(),
            mode: "zz".into(),
            ..Default::default()
        };
        assert_eq!(settings.mode(), Mode::Ss);
        assert_eq!(settings.endpoint(), Some(Endpoint::new("10.0.0.1", None)));
    }

    #[test]
    fn test_persist_keeps_client_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        ClientSettings {
            bot_qq: "222".into(),
            show_avatar: false,
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let mut store = SettingsStore::open(path.clone());
        store
            .persist(&PersistedState {
                endpoint: Some(Endpoint::new("10.0.0.1", Some(8081))),
                mode: Mode::Dd,
                credential: "secret".into(),
                user_id: "web_user".into(),
            })
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["ip"], "10.0.0.1");
        assert_eq!(json["port"], "8081");
        assert_eq!(json["mode"], "dd");
        assert_eq!(json["wsPassword"], "secret");
        assert_eq!(json["botQQ"], "222");
        assert_eq!(json["showAvatar"], false);
        assert!(json["lastUpdate"].is_i64());
        assert_eq!(store.snapshot().mode(), Mode::Dd);
    }
}
