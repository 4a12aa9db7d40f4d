use std::{fs, io, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use client_core::{
    authority::{parse_base_url, updates_url_for},
    HttpAuthority, SessionOptions,
};
use serde::Deserialize;
use shared::domain::{ActuatorId, DeviceId};
use url::Url;

pub const SETTINGS_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub ws_url: Option<String>,
    pub device_id: String,
    pub poll_interval_ms: u64,
    pub actuators: Vec<String>,
    pub status_ttl_ms: u64,
    pub request_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".into(),
            ws_url: None,
            device_id: "rack-1".into(),
            poll_interval_ms: 5000,
            actuators: vec!["actuator".into()],
            status_ttl_ms: 3000,
            request_timeout_ms: None,
        }
    }
}

impl Settings {
    pub fn authority(&self) -> Result<HttpAuthority> {
        HttpAuthority::with_timeout(
            &self.api_url,
            self.request_timeout_ms.map(Duration::from_millis),
        )
    }

    /// Push channel location: `ws_url` when set, otherwise derived from
    /// `api_url`.
    pub fn updates_url(&self) -> Result<Url> {
        match self.ws_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let url = Url::parse(raw).with_context(|| format!("invalid ws url: {raw}"))?;
                match url.scheme() {
                    "ws" | "wss" => Ok(url),
                    other => Err(anyhow!("ws url must use ws or wss, got {other}")),
                }
            }
            _ => updates_url_for(&parse_base_url(&self.api_url)?),
        }
    }

    /// A one-shot command starts with no reported actuator values, and every
    /// write carries the full actuator set. With more than one actuator the
    /// write would switch the others off, so only single-actuator racks may
    /// be driven this way.
    pub fn ensure_one_shot_command_allowed(&self) -> Result<()> {
        let configured = self
            .actuators
            .iter()
            .filter(|name| !name.trim().is_empty())
            .count();
        if configured > 1 {
            return Err(anyhow!(
                "one-shot commands need every actuator's current value; \
                 {configured} actuators are configured and only one is supported"
            ));
        }
        Ok(())
    }

    pub fn session_options(&self, with_push: bool) -> Result<SessionOptions> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        let actuators: Vec<ActuatorId> = self
            .actuators
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(ActuatorId::from)
            .collect();
        if actuators.is_empty() {
            return Err(anyhow!("at least one actuator must be configured"));
        }
        let updates_url = if with_push {
            Some(self.updates_url()?)
        } else {
            None
        };
        Ok(SessionOptions {
            device_id: DeviceId::new(self.device_id.trim()),
            actuators,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            updates_url,
            status_ttl: Duration::from_millis(self.status_ttl_ms),
        })
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file if it exists, then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };

    if let Some(v) = env_value(&env, "API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env_value(&env, "WS_URL") {
        settings.ws_url = Some(v);
    }
    if let Some(v) = env_value(&env, "DEVICE_ID") {
        settings.device_id = v;
    }
    if let Some(v) = env("APP__POLL_INTERVAL_MS") {
        settings.poll_interval_ms = parse_number("APP__POLL_INTERVAL_MS", &v)?;
    }
    if let Some(v) = env("APP__ACTUATORS") {
        settings.actuators = v.split(',').map(|name| name.trim().to_string()).collect();
    }
    if let Some(v) = env("APP__STATUS_TTL_MS") {
        settings.status_ttl_ms = parse_number("APP__STATUS_TTL_MS", &v)?;
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_MS") {
        settings.request_timeout_ms = Some(parse_number("APP__REQUEST_TIMEOUT_MS", &v)?);
    }

    parse_base_url(&settings.api_url)?;
    Ok(settings)
}

/// `APP__<KEY>` wins over the plain `<KEY>`.
fn env_value(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(&format!("APP__{key}")).or_else(|| env(key))
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got '{raw}'"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
