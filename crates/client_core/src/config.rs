use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::transport;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub login_path: String,
    pub socket_path: String,
    pub session_file: PathBuf,
    pub event_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            login_path: "/api/v1/auth/login".into(),
            socket_path: "/ws".into(),
            session_file: default_session_file(),
            event_buffer: 1024,
        }
    }
}

impl ClientSettings {
    pub fn login_url(&self) -> String {
        format!(
            "{}{}",
            self.server_url.trim_end_matches('/'),
            self.login_path
        )
    }

    pub fn socket_url(&self) -> Result<Url> {
        transport::socket_url(&self.server_url, &self.socket_path)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    login_path: Option<String>,
    socket_path: Option<String>,
    session_file: Option<PathBuf>,
    event_buffer: Option<usize>,
}

fn default_session_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat_client")
        .join("session.json")
}

/// Defaults, then the TOML file (if it exists), then environment variables.
pub fn load_settings(config_path: Option<&Path>) -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid client config '{}'", path.display()))?;
            apply_file_settings(&mut settings, file_cfg);
        }
        Err(err) if config_path.is_some() => {
            return Err(err)
                .with_context(|| format!("failed to read client config '{}'", path.display()));
        }
        Err(_) => {}
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.login_path {
        settings.login_path = v;
    }
    if let Some(v) = file_cfg.socket_path {
        settings.socket_path = v;
    }
    if let Some(v) = file_cfg.session_file {
        settings.session_file = v;
    }
    if let Some(v) = file_cfg.event_buffer {
        settings.event_buffer = v;
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__LOGIN_PATH") {
        settings.login_path = v;
    }
    if let Some(v) = var("APP__SOCKET_PATH") {
        settings.socket_path = v;
    }
    if let Some(v) = var("APP__SESSION_FILE") {
        settings.session_file = PathBuf::from(v);
    }
    if let Some(v) = var("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed;
        }
    }
}
