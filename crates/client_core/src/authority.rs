//! The remote state store seam: every network call the core makes goes
//! through [`DeviceAuthority`].

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::InventoryItem,
    protocol::{
        ActuatorCommandRequest, AdjustStockRequest, ModeResponse, SensorReadings, SetModeRequest,
    },
};
use url::Url;

#[async_trait]
pub trait DeviceAuthority: Send + Sync {
    async fn read_inventory(&self) -> Result<Vec<InventoryItem>>;
    async fn adjust_stock(&self, name: &str, delta: i64) -> Result<()>;
    async fn read_sensors(&self) -> Result<SensorReadings>;
    async fn read_mode(&self) -> Result<ModeResponse>;
    async fn set_mode(&self, request: &SetModeRequest) -> Result<()>;
    async fn send_command(&self, request: &ActuatorCommandRequest) -> Result<()>;
}

/// REST client for the rack authority.
#[derive(Clone)]
pub struct HttpAuthority {
    http: Client,
    base_url: Url,
}

impl HttpAuthority {
    pub fn new(api_url: &str) -> Result<Self> {
        Self::with_timeout(api_url, None)
    }

    pub fn with_timeout(api_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base_url = parse_base_url(api_url)?;
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Push channel location derived from the api url: same host, `ws`/`wss`
    /// scheme, `/ws/updates` path.
    pub fn updates_url(&self) -> Result<Url> {
        updates_url_for(&self.base_url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("api url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

pub fn parse_base_url(api_url: &str) -> Result<Url> {
    let url = Url::parse(api_url.trim()).with_context(|| format!("invalid api url: {api_url}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("api url must use http or https, got {other}")),
    }
    if url.cannot_be_a_base() {
        return Err(anyhow!("api url cannot be a base: {url}"));
    }
    Ok(url)
}

pub fn updates_url_for(api_url: &Url) -> Result<Url> {
    let mut url = api_url.clone();
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket url from {api_url}"))?;
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| anyhow!("api url cannot be a base: {api_url}"))?
        .pop_if_empty()
        .extend(["ws", "updates"]);
    Ok(url)
}

#[async_trait]
impl DeviceAuthority for HttpAuthority {
    async fn read_inventory(&self) -> Result<Vec<InventoryItem>> {
        let items = self
            .http
            .get(self.endpoint(&["items"])?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(items)
    }

    async fn adjust_stock(&self, name: &str, delta: i64) -> Result<()> {
        self.http
            .patch(self.endpoint(&["items", name])?)
            .json(&AdjustStockRequest { delta })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn read_sensors(&self) -> Result<SensorReadings> {
        let readings = self
            .http
            .get(self.endpoint(&["api", "sensor-data"])?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(readings)
    }

    async fn read_mode(&self) -> Result<ModeResponse> {
        let mode = self
            .http
            .get(self.endpoint(&["api", "mode"])?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(mode)
    }

    async fn set_mode(&self, request: &SetModeRequest) -> Result<()> {
        self.http
            .post(self.endpoint(&["api", "mode"])?)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_command(&self, request: &ActuatorCommandRequest) -> Result<()> {
        self.http
            .post(self.endpoint(&["api", "send-command"])?)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
