//! Channel transport boundary.
//!
//! The engine hands fully rendered messages to a `ChannelTransport` and
//! gets back a provider receipt. Everything provider-specific (gateway
//! URLs, credentials, response formats) stays behind this trait; transport
//! failures are caught by the dispatcher and recorded as failed attempts,
//! they never abort a send as a whole.

mod http_gateway;

pub use http_gateway::HttpGatewayTransport;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::TransportConfig;

/// Errors that can occur while handing a message to a provider.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider or gateway rejected the message
    #[error("Provider error: {0}")]
    Provider(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The bounded send window elapsed
    #[error("Transport call timed out")]
    Timeout,

    /// The rendered message carries no code the OTP channel could deliver
    #[error("No one-time code found in rendered message")]
    MissingOtpCode,
}

/// What the provider acknowledged for one accepted message.
#[derive(Debug, Clone, Default)]
pub struct ProviderReceipt {
    /// Provider-side message id, when the provider returns one
    pub message_id: Option<String>,
}

/// Send primitives of the delivery channels.
///
/// Implementations must be `Send + Sync`; one instance is shared by the
/// dispatcher across concurrent channel attempts.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Deliver a plain text message over SMS.
    async fn send_sms(&self, to: &str, message: &str) -> Result<ProviderReceipt, TransportError>;

    /// Deliver a conversational WhatsApp message, optionally with a media
    /// attachment (invoice or branding image URL).
    async fn send_whatsapp(
        &self,
        to: &str,
        message: &str,
        media_url: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError>;

    /// Deliver a one-time code through the WhatsApp Cloud API's
    /// template-restricted authentication flow.
    async fn send_whatsapp_cloud_otp(
        &self,
        to: &str,
        code: &str,
        language: &str,
    ) -> Result<ProviderReceipt, TransportError>;
}

/// Extract the one-time code from a rendered message.
///
/// The code is a run of exactly six consecutive ASCII digits; longer digit
/// runs (phone numbers, order totals) do not qualify.
pub fn extract_otp_code(message: &str) -> Option<&str> {
    let bytes = message.as_bytes();
    let mut start = None;

    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            if i - s == 6 {
                return Some(&message[s..i]);
            }
        }
    }

    if let Some(s) = start {
        if bytes.len() - s == 6 {
            return Some(&message[s..]);
        }
    }

    None
}

/// Transport that logs instead of sending.
///
/// Selected in development so the whole dispatch path runs without a
/// messaging gateway.
#[derive(Debug, Default)]
pub struct DryRunTransport;

impl DryRunTransport {
    pub fn new() -> Self {
        Self
    }

    fn receipt() -> ProviderReceipt {
        ProviderReceipt {
            message_id: Some(format!("dry-{}", Uuid::new_v4())),
        }
    }
}

#[async_trait]
impl ChannelTransport for DryRunTransport {
    async fn send_sms(&self, to: &str, message: &str) -> Result<ProviderReceipt, TransportError> {
        tracing::info!(to = %to, chars = message.len(), "Dry-run SMS send");
        Ok(Self::receipt())
    }

    async fn send_whatsapp(
        &self,
        to: &str,
        message: &str,
        media_url: Option<&str>,
    ) -> Result<ProviderReceipt, TransportError> {
        tracing::info!(
            to = %to,
            chars = message.len(),
            media = media_url.unwrap_or("none"),
            "Dry-run WhatsApp send"
        );
        Ok(Self::receipt())
    }

    async fn send_whatsapp_cloud_otp(
        &self,
        to: &str,
        _code: &str,
        language: &str,
    ) -> Result<ProviderReceipt, TransportError> {
        tracing::info!(to = %to, language = %language, "Dry-run WhatsApp Cloud OTP send");
        Ok(Self::receipt())
    }
}

/// Create the transport selected by configuration.
///
/// `http` talks to the messaging gateway; anything else falls back to the
/// dry-run transport with a warning.
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn ChannelTransport>, TransportError> {
    match config.mode.as_str() {
        "http" => {
            let transport = HttpGatewayTransport::new(config)?;
            tracing::info!(base_url = %config.gateway_url, "Using HTTP gateway transport");
            Ok(Arc::new(transport))
        }
        "dry_run" => {
            tracing::info!("Using dry-run transport");
            Ok(Arc::new(DryRunTransport::new()))
        }
        other => {
            tracing::warn!(mode = %other, "Unknown transport mode, falling back to dry-run");
            Ok(Arc::new(DryRunTransport::new()))
        }
    }
}
