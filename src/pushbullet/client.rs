//! Pushbullet REST client (reqwest).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ApiError;
use crate::pushbullet::api::{Device, Push, PushApi};

pub const API_BASE: &str = "https://api.pushbullet.com/v2";

/// Token-authenticated REST client. Also carries the device CRUD calls used
/// by the CLI adapters; the routing core only sees the [`PushApi`] seam.
#[derive(Clone)]
pub struct PushbulletClient {
    token: SecretString,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct PushList {
    #[serde(default)]
    pushes: Vec<Push>,
}

impl PushbulletClient {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    /// The raw token, needed to build the websocket URL.
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{API_BASE}/{endpoint}")
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(endpoint))
            .header("Access-Token", self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }

    async fn post_json(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .client
            .post(self.url(endpoint))
            .header("Access-Token", self.token.expose_secret())
            .json(body)
            .send()
            .await?;
        self.check(resp).await
    }

    /// Register a new device (CLI `register`).
    pub async fn create_device(&self, nickname: &str) -> Result<Device, ApiError> {
        let body = serde_json::json!({
            "nickname": nickname,
            "model": "push-tmux",
            "manufacturer": "push-tmux",
            "app_version": 1,
            "icon": "desktop",
        });
        Ok(self.post_json("devices", &body).await?.json().await?)
    }

    /// Delete a device by iden (CLI `delete-devices`).
    pub async fn delete_device(&self, iden: &str) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.url(&format!("devices/{iden}")))
            .header("Access-Token", self.token.expose_secret())
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl PushApi for PushbulletClient {
    async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        let list: DeviceList = self.get_json("devices", &[]).await?;
        Ok(list.devices)
    }

    async fn list_pushes_since(
        &self,
        modified_after: f64,
        limit: usize,
    ) -> Result<Vec<Push>, ApiError> {
        let list: PushList = self
            .get_json(
                "pushes",
                &[
                    ("modified_after", modified_after.to_string()),
                    ("limit", limit.to_string()),
                    ("active", "true".to_string()),
                ],
            )
            .await?;
        Ok(list.pushes)
    }

    async fn send_note(
        &self,
        title: &str,
        body: &str,
        target_device_iden: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut payload = serde_json::json!({
            "type": "note",
            "title": title,
            "body": body,
        });
        if let Some(iden) = target_device_iden {
            payload["device_iden"] = serde_json::Value::String(iden.to_string());
        }
        self.post_json("pushes", &payload).await?;
        Ok(())
    }
}
