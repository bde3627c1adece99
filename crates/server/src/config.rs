use std::{collections::HashMap, fs, net::SocketAddr, path::PathBuf};

use anyhow::Context;
use serde::Deserialize;
use shared::domain::RELAY_PORT;

const SETTINGS_FILE: &str = "stim_server.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub host: String,
    /// Static stimulus pages.
    pub port: u16,
    /// Relay WebSocket input.
    pub ws_port: u16,
    pub web_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            ws_port: RELAY_PORT,
            web_dir: PathBuf::from("web"),
        }
    }
}

impl Settings {
    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    pub fn ws_addr(&self) -> anyhow::Result<SocketAddr> {
        socket_addr(&self.host, self.ws_port)
    }
}

fn socket_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address '{host}:{port}'"))
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    settings_from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the flat TOML table, then environment overrides.
///
/// `APP__*` variables are applied after the plain `STIM_*` ones and win.
pub(crate) fn settings_from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) {
            if let Some(v) = file_cfg.get("host").and_then(toml::Value::as_str) {
                settings.host = v.to_string();
            }
            if let Some(v) = file_cfg.get("port").and_then(port_value) {
                settings.port = v;
            }
            if let Some(v) = file_cfg.get("ws_port").and_then(port_value) {
                settings.ws_port = v;
            }
            if let Some(v) = file_cfg.get("web_dir").and_then(toml::Value::as_str) {
                settings.web_dir = PathBuf::from(v);
            }
        }
    }

    for key in ["STIM_HOST", "APP__HOST"] {
        if let Some(v) = env(key) {
            settings.host = v;
        }
    }
    for key in ["STIM_PORT", "APP__PORT"] {
        if let Some(v) = env(key).and_then(|v| v.parse::<u16>().ok()) {
            settings.port = v;
        }
    }
    for key in ["STIM_WS_PORT", "APP__WS_PORT"] {
        if let Some(v) = env(key).and_then(|v| v.parse::<u16>().ok()) {
            settings.ws_port = v;
        }
    }
    for key in ["STIM_WEB_DIR", "APP__WEB_DIR"] {
        if let Some(v) = env(key) {
            settings.web_dir = PathBuf::from(v);
        }
    }

    settings
}

fn port_value(value: &toml::Value) -> Option<u16> {
    match value {
        toml::Value::Integer(v) => u16::try_from(*v).ok(),
        toml::Value::String(v) => v.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
