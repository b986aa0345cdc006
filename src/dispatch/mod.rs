//! Dispatch engine: one business trigger in, per-channel delivery attempts
//! out.
//!
//! A send loads the channel settings fresh from the store, resolves the
//! recipient and the template variables, then walks the channels in one of
//! two modes:
//! - **dual**: every globally-enabled candidate channel is attempted
//!   concurrently; the send succeeds if any channel does.
//! - **failover**: channels are attempted strictly in priority order and
//!   the first success short-circuits the rest.
//!
//! Transport failures never escape this module; they become failed log
//! rows and per-channel flags in the outcome. Only a missing settings
//! record or an unresolvable recipient abort a send.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use serde::Serialize;
use thiserror::Error;

use crate::config::{IdentityConfig, TransportConfig};
use crate::context::NotificationContext;
use crate::metrics::{
    DISPATCH_LATENCY, NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_SENT_TOTAL,
    NOTIFICATIONS_SKIPPED_TOTAL,
};
use crate::resolver::{ResolvedVariables, VariableResolver};
use crate::store::{ChannelSettings, NotificationLog, NotificationStore, StoreError};
use crate::template;
use crate::transport::{extract_otp_code, ChannelTransport, ProviderReceipt, TransportError};
use crate::trigger::{Channel, RecipientKind, Trigger};

/// Errors that abort a send as a whole.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The settings singleton has never been saved
    #[error("Notification settings are not configured")]
    Configuration,

    /// No destination phone number could be determined
    #[error("No recipient phone number could be resolved")]
    RecipientNotFound,

    /// Store failure outside any single channel attempt
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// How the channels are walked for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Fan out to all enabled channels concurrently
    Dual,
    /// Sequential priority order, first success wins
    Failover,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Dual => "dual",
            DeliveryMode::Failover => "failover",
        }
    }
}

/// Outcome of one send across all its channel attempts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchOutcome {
    /// Whether any channel delivered the message
    pub success: bool,
    /// First channel that delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Per-channel result for every attempted channel; skipped channels
    /// are absent
    pub channels: BTreeMap<Channel, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Statistics for the dispatch engine
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Total send requests
    pub total_sends: AtomicU64,
    /// Total channel attempts that delivered
    pub total_delivered: AtomicU64,
    /// Total channel attempts that failed
    pub total_failed: AtomicU64,
    /// Total channel attempts skipped for lack of a usable template
    pub total_skipped: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_sends: self.total_sends.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_sends: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_skipped: u64,
}

/// Result of one channel attempt, before it is logged.
enum ChannelAttempt {
    /// No usable template; the channel simply does not apply
    Skipped,
    Sent {
        content: String,
        message_id: Option<String>,
    },
    Failed {
        content: String,
        error: String,
    },
}

/// Sends notifications over the configured channels.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    transport: Arc<dyn ChannelTransport>,
    resolver: VariableResolver,
    send_timeout: Duration,
    otp_language: String,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn ChannelTransport>,
        identity: IdentityConfig,
        transport_config: &TransportConfig,
    ) -> Self {
        Self {
            resolver: VariableResolver::new(store.clone(), identity),
            store,
            transport,
            send_timeout: Duration::from_secs(transport_config.send_timeout_seconds),
            otp_language: transport_config.otp_language.clone(),
            stats: DispatcherStats::default(),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send one notification.
    ///
    /// Settings are loaded fresh on every call so back-office changes
    /// apply to the very next send.
    #[tracing::instrument(
        name = "dispatch.send",
        skip(self, context),
        fields(trigger = %trigger, recipient = ?recipient_kind, mode = ?mode)
    )]
    pub async fn send(
        &self,
        trigger: Trigger,
        recipient_kind: RecipientKind,
        context: &NotificationContext,
        mode: DeliveryMode,
    ) -> DispatchResult<DispatchOutcome> {
        let started = Instant::now();
        self.stats.total_sends.fetch_add(1, Ordering::Relaxed);

        let result = self.send_inner(trigger, recipient_kind, context, mode).await;

        DISPATCH_LATENCY
            .with_label_values(&[mode.as_str()])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn send_inner(
        &self,
        trigger: Trigger,
        recipient_kind: RecipientKind,
        context: &NotificationContext,
        mode: DeliveryMode,
    ) -> DispatchResult<DispatchOutcome> {
        let settings = self
            .store
            .channel_settings()
            .await?
            .ok_or(DispatchError::Configuration)?;

        let resolved = self.resolver.resolve(trigger, context).await?;
        let recipient = resolve_recipient(recipient_kind, &settings, &resolved)?;

        let outcome = match mode {
            DeliveryMode::Dual => {
                self.send_dual(trigger, &recipient, &resolved, &settings, context)
                    .await
            }
            DeliveryMode::Failover => {
                self.send_failover(trigger, &recipient, &resolved, &settings, context)
                    .await
            }
        };

        tracing::info!(
            trigger = %trigger,
            recipient = %recipient,
            success = outcome.success,
            channel = ?outcome.channel,
            "Notification dispatched"
        );
        Ok(outcome)
    }

    /// Attempt every enabled candidate channel concurrently.
    async fn send_dual(
        &self,
        trigger: Trigger,
        recipient: &str,
        resolved: &ResolvedVariables,
        settings: &ChannelSettings,
        context: &NotificationContext,
    ) -> DispatchOutcome {
        let candidates: Vec<Channel> = Channel::DUAL_CANDIDATES
            .iter()
            .copied()
            .filter(|&channel| settings.channel_enabled(channel))
            .collect();

        let attempts = candidates.iter().map(|&channel| {
            self.attempt_channel(trigger, channel, recipient, resolved, settings)
        });
        let results = future::join_all(attempts).await;

        let mut outcome = DispatchOutcome::default();
        for (&channel, attempt) in candidates.iter().zip(results) {
            match attempt {
                ChannelAttempt::Skipped => {
                    self.record_skip(trigger, channel);
                }
                ChannelAttempt::Sent {
                    content,
                    message_id,
                } => {
                    self.record_sent(channel);
                    self.append_log(
                        NotificationLog::sent(
                            trigger,
                            channel,
                            recipient,
                            content,
                            message_id.clone(),
                        ),
                        context,
                    )
                    .await;
                    outcome.channels.insert(channel, true);
                    outcome.success = true;
                    if outcome.channel.is_none() {
                        outcome.channel = Some(channel);
                        outcome.message_id = message_id;
                    }
                }
                ChannelAttempt::Failed { content, error } => {
                    self.record_failed(channel, &error);
                    self.append_log(
                        NotificationLog::failed(trigger, channel, recipient, content, &error),
                        context,
                    )
                    .await;
                    outcome.channels.insert(channel, false);
                    if outcome.error.is_none() {
                        outcome.error = Some(error);
                    }
                }
            }
        }

        if !outcome.success && outcome.channels.is_empty() && outcome.error.is_none() {
            outcome.error = Some("no channel available".to_string());
        }
        outcome
    }

    /// Walk the priority order sequentially, stopping at the first
    /// delivery. Exactly one log row is written: the success, or one
    /// final failure after exhaustion.
    async fn send_failover(
        &self,
        trigger: Trigger,
        recipient: &str,
        resolved: &ResolvedVariables,
        settings: &ChannelSettings,
        context: &NotificationContext,
    ) -> DispatchOutcome {
        let priority = settings.failover_channels();
        let mut outcome = DispatchOutcome::default();
        let mut last_failure: Option<(Channel, String, String)> = None;

        for &channel in &priority {
            if !settings.channel_enabled(channel) {
                tracing::debug!(channel = %channel, "Channel disabled, failover continues");
                continue;
            }

            match self
                .attempt_channel(trigger, channel, recipient, resolved, settings)
                .await
            {
                ChannelAttempt::Skipped => {
                    self.record_skip(trigger, channel);
                }
                ChannelAttempt::Sent {
                    content,
                    message_id,
                } => {
                    self.record_sent(channel);
                    self.append_log(
                        NotificationLog::sent(
                            trigger,
                            channel,
                            recipient,
                            content,
                            message_id.clone(),
                        ),
                        context,
                    )
                    .await;
                    outcome.channels.insert(channel, true);
                    outcome.success = true;
                    outcome.channel = Some(channel);
                    outcome.message_id = message_id;
                    return outcome;
                }
                ChannelAttempt::Failed { content, error } => {
                    self.record_failed(channel, &error);
                    tracing::warn!(
                        channel = %channel,
                        error = %error,
                        "Channel attempt failed, trying next in failover order"
                    );
                    outcome.channels.insert(channel, false);
                    last_failure = Some((channel, content, error));
                }
            }
        }

        // Exhausted without a delivery
        let (channel, content, error) = last_failure.unwrap_or_else(|| {
            let channel = priority.first().copied().unwrap_or(Channel::WhatsApp);
            (channel, String::new(), "no template available".to_string())
        });
        self.append_log(
            NotificationLog::failed(trigger, channel, recipient, content, &error),
            context,
        )
        .await;
        outcome.error = Some(error);
        outcome
    }

    /// Template lookup, render and transport call for one channel.
    ///
    /// Nothing is logged here; the caller decides which attempts reach the
    /// audit trail.
    async fn attempt_channel(
        &self,
        trigger: Trigger,
        channel: Channel,
        recipient: &str,
        resolved: &ResolvedVariables,
        settings: &ChannelSettings,
    ) -> ChannelAttempt {
        if channel == Channel::Email {
            // Listed in settings for the back office, no transport behind it
            tracing::debug!(trigger = %trigger, "Email has no transport, skipping");
            return ChannelAttempt::Skipped;
        }

        let template = match self.store.find_template(trigger, channel).await {
            Ok(Some(template)) if template.enabled => template,
            Ok(_) => {
                tracing::debug!(
                    trigger = %trigger,
                    channel = %channel,
                    "No enabled template, channel skipped"
                );
                return ChannelAttempt::Skipped;
            }
            Err(e) => {
                return ChannelAttempt::Failed {
                    content: String::new(),
                    error: format!("template lookup failed: {e}"),
                };
            }
        };

        let content = template::render(&template.content, &resolved.variables);
        match self
            .transport_send(channel, recipient, &content, resolved, settings)
            .await
        {
            Ok(receipt) => ChannelAttempt::Sent {
                content,
                message_id: receipt.message_id,
            },
            Err(e) => ChannelAttempt::Failed {
                content,
                error: e.to_string(),
            },
        }
    }

    /// Hand the rendered content to the transport, bounded by the send
    /// timeout.
    async fn transport_send(
        &self,
        channel: Channel,
        to: &str,
        content: &str,
        resolved: &ResolvedVariables,
        settings: &ChannelSettings,
    ) -> Result<ProviderReceipt, TransportError> {
        let call = async {
            match channel {
                Channel::Sms => self.transport.send_sms(to, content).await,
                Channel::WhatsApp => {
                    let media_url = resolved
                        .variables
                        .get("invoice_url")
                        .and_then(|v| v.as_str())
                        .or(settings.default_media_url.as_deref());
                    self.transport.send_whatsapp(to, content, media_url).await
                }
                Channel::WhatsAppCloud => {
                    let code =
                        extract_otp_code(content).ok_or(TransportError::MissingOtpCode)?;
                    self.transport
                        .send_whatsapp_cloud_otp(to, code, &self.otp_language)
                        .await
                }
                Channel::Email => Err(TransportError::Provider(
                    "email transport not implemented".to_string(),
                )),
            }
        };

        match tokio::time::timeout(self.send_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn append_log(&self, entry: NotificationLog, context: &NotificationContext) {
        let mut entry = entry;
        if let Some(order_id) = context.entity.order_id() {
            entry = entry.with_order(order_id);
        }
        if let Some(customer_id) = context.entity.customer_id() {
            entry = entry.with_customer(customer_id);
        }
        if let Err(e) = self.store.append_log(entry).await {
            tracing::warn!(error = %e, "Failed to append notification log row");
        }
    }

    fn record_sent(&self, channel: Channel) {
        self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
        NOTIFICATIONS_SENT_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc();
    }

    fn record_failed(&self, channel: Channel, error: &str) {
        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        NOTIFICATIONS_FAILED_TOTAL
            .with_label_values(&[channel.as_str()])
            .inc();
        tracing::debug!(channel = %channel, error = %error, "Channel attempt failed");
    }

    fn record_skip(&self, trigger: Trigger, channel: Channel) {
        self.stats.total_skipped.fetch_add(1, Ordering::Relaxed);
        NOTIFICATIONS_SKIPPED_TOTAL.inc();
        tracing::debug!(trigger = %trigger, channel = %channel, "Channel skipped");
    }
}

/// Destination resolution.
///
/// Test mode reroutes everything to the rehearsal number. Otherwise admin
/// sends use the configured admin numbers and customer sends use the
/// recipient chain the resolver produced.
fn resolve_recipient(
    kind: RecipientKind,
    settings: &ChannelSettings,
    resolved: &ResolvedVariables,
) -> DispatchResult<String> {
    if settings.test_mode {
        if let Some(test_phone) = settings
            .test_phone
            .as_deref()
            .filter(|phone| !phone.is_empty())
        {
            tracing::info!(test_phone = %test_phone, "Test mode active, rerouting send");
            return Ok(test_phone.to_string());
        }
        tracing::warn!("Test mode enabled without a test phone, using real routing");
    }

    let phone = match kind {
        RecipientKind::Admin => settings.admin_phone().map(str::to_string),
        RecipientKind::Customer => resolved.recipient_phone.clone(),
    };
    phone.ok_or(DispatchError::RecipientNotFound)
}
