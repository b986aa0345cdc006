//! HTTP messaging-gateway transport.
//!
//! Posts rendered messages as JSON to the internal messaging gateway, one
//! endpoint per channel. The gateway wraps the actual SMS and WhatsApp
//! providers and answers `{ "message_id": "..." }` for accepted messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::TransportConfig;

use super::{ChannelTransport, ProviderReceipt, TransportError};

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    message_id: Option<String>,
}

/// Transport adapter for the HTTP messaging gateway.
pub struct HttpGatewayTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGatewayTransport {
    /// Build the adapter with a bounded-timeout HTTP client.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ProviderReceipt, TransportError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            let data: GatewayResponse = response.json().await?;
            Ok(ProviderReceipt {
                message_id: data.message_id,
            })
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            Err(TransportError::Provider(format!(
                "gateway returned {status}: {detail}"
            )))
        }
    }
}

#[async_trait]
impl ChannelTransport for HttpGatewayTransport {
    async fn send_sms(&self, to: &str, message: &str) -> Result<ProviderReceipt, TransportError> {
        let receipt = self
            .post(
                "sms",
                json!({
                    "to": to,
                    "message": message,
                }),
            )
            .await?;

        tracing::debug!(
            to = %to,
            message_id = receipt.message_id.as_deref().unwrap_or("none"),
            "SMS accepted by gateway"
        );

        Ok(receipt)
    }

    async fn send_whatsapp(
        &self,
        to: &str,
        message: &str,
        media_url: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        let mut body = json!({
            "to": to,
            "message": message,
        });
        if let Some(url) = media_url {
            body["media_url"] = json!(url);
        }

        let receipt = self.post("whatsapp", body).await?;

        tracing::debug!(
            to = %to,
            message_id = receipt.message_id.as_deref().unwrap_or("none"),
            "WhatsApp message accepted by gateway"
        );

        Ok(receipt)
    }

    async fn send_whatsapp_cloud_otp(
        &self,
        to: &str,
        code: &str,
        language: &str,
    ) -> Result<ProviderReceipt, TransportError> {
        let receipt = self
            .post(
                "otp",
                json!({
                    "to": to,
                    "code": code,
                    "language": language,
                }),
            )
            .await?;

        tracing::debug!(
            to = %to,
            message_id = receipt.message_id.as_deref().unwrap_or("none"),
            "OTP accepted by gateway"
        );

        Ok(receipt)
    }
}
