//! 3Commas REST client
//!
//! API Documentation: https://github.com/3commas-io/3commas-official-api-docs
//!
//! Signed endpoints need two headers: `APIKEY` and `Signature`, the latter
//! being the hex HMAC-SHA256 of the request path plus query string.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

use super::types::{ApiErrorBody, Bot, DealUpdateAck};
use super::PlatformClient;
use crate::config::Settings;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Prefix shared by all public API endpoints
pub const API_PATH: &str = "/public/api/ver1";

/// 3Commas API client
pub struct ThreeCommasClient {
    client: Client,
    base_url: Url,
    api_key: String,
    api_secret: String,
}

impl ThreeCommasClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API host, e.g. `https://api.3commas.io`
    /// * `api_key` / `api_secret` - key pair with bot read and deal write permissions
    /// * `timeout` - per request timeout
    pub fn new(base_url: &str, api_key: &str, api_secret: &str, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(Error::MissingCredentials(
                "api-key and api-secret must both be set".to_string(),
            ));
        }

        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid api-url '{}': {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// Create a client from the `[settings]` table
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.api_url,
            &settings.api_key,
            &settings.api_secret,
            Duration::from_secs(settings.request_timeout),
        )
    }

    /// Build the full URL for an endpoint below `API_PATH`
    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("{}/{}", API_PATH, path.trim_start_matches('/')))
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", path, e)))?;

        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        Ok(url)
    }

    /// Signature over path and query, as 3Commas expects it
    fn sign(&self, url: &Url) -> Result<String> {
        let payload = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| Error::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Send a signed request and decode the JSON response
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path, query)?;
        let signature = self.sign(&url)?;

        debug!("{} {}", method, url.path());

        let response = self
            .client
            .request(method, url)
            .header("APIKEY", &self.api_key)
            .header("Signature", signature)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        if body.trim().is_empty() || body.trim() == "null" {
            return Err(Error::NoData(path.to_string()));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Deserialization(format!("Failed to parse response: {}", e)))
    }
}

/// Map a rejected response to an API error, keeping the platform's message
fn error_from_response(status: StatusCode, body: &str) -> Error {
    let msg = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(ApiErrorBody::message)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

    Error::Api {
        status: Some(status.as_u16()),
        msg,
    }
}

#[async_trait]
impl PlatformClient for ThreeCommasClient {
    async fn fetch_bot(&self, bot_id: u64) -> Result<Bot> {
        self.request(
            Method::GET,
            &format!("bots/{}/show", bot_id),
            &[("include_events", "false".to_string())],
        )
        .await
    }

    async fn submit_deal_update(
        &self,
        bot_id: u64,
        deal_id: u64,
        stop_loss_percentage: f64,
        take_profit: f64,
    ) -> Result<DealUpdateAck> {
        // The update_deal payload carries the owning bot id in its `deal_id` field
        self.request(
            Method::PATCH,
            &format!("deals/{}/update_deal", deal_id),
            &[
                ("deal_id", bot_id.to_string()),
                ("stop_loss_percentage", stop_loss_percentage.to_string()),
                ("take_profit", take_profit.to_string()),
            ],
        )
        .await
    }
}
