//! Resolve-then-send for every message kind.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tracing::{info, warn},
    zapgate_channels::{ChannelOutbound, ChatProvider, ProviderError, SendReceipt},
    zapgate_common::{CanonicalNumber, InstanceKey, MediaKind, OutboundMessage},
    zapgate_phone::{PhoneError, ResolutionEngine, ResolutionResult},
};

use crate::error::GatewayError;

const MAX_BUTTONS: usize = 3;

pub struct Outbox {
    engine: Arc<ResolutionEngine>,
    provider: Arc<dyn ChatProvider>,
    send_timeout: Duration,
}

impl Outbox {
    pub fn new(
        engine: Arc<ResolutionEngine>,
        provider: Arc<dyn ChatProvider>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            provider,
            send_timeout,
        }
    }

    /// Phone number behind a `…@lid` identity.
    pub async fn lid_to_phone(
        &self,
        instance: &InstanceKey,
        lid: &str,
    ) -> Result<CanonicalNumber, GatewayError> {
        Ok(self.engine.lid_to_phone(instance, lid).await?)
    }

    /// Resolve `to` without sending anything.
    pub async fn validate(
        &self,
        instance: &InstanceKey,
        to: &str,
    ) -> Result<ResolutionResult, GatewayError> {
        Ok(self.engine.resolve(instance, to).await?)
    }

    /// Check the message, resolve the recipient, then hand both to the provider.
    pub async fn send(
        &self,
        instance: &InstanceKey,
        to: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, GatewayError> {
        check_message(&message).map_err(GatewayError::BadRequest)?;
        let target = self.engine.resolve_for_send(instance, to).await?;

        let send = tokio::time::timeout(
            self.send_timeout,
            self.provider.send(instance, &target.recipient, &message),
        );
        let outcome = tokio::select! {
            biased;
            () = target.lease.cancelled() => {
                warn!(instance = %instance, to = %target.recipient, "session dropped while sending");
                return Err(PhoneError::SessionNotConnected(instance.clone()).into());
            }
            outcome = send => outcome,
        };

        let delivery_id = match outcome {
            Ok(Ok(id)) => id,
            Ok(Err(ProviderError::NotConnected(_))) => {
                return Err(PhoneError::SessionNotConnected(instance.clone()).into());
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(GatewayError::SendTimeout(target.recipient.to_string())),
        };

        info!(
            instance = %instance,
            to = %target.recipient,
            kind = message.kind(),
            corrected = target.was_corrected,
            delivery_id = %delivery_id.0,
            "message sent"
        );
        Ok(SendReceipt {
            delivery_id,
            recipient: target.recipient,
        })
    }
}

#[async_trait]
impl ChannelOutbound for Outbox {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        to: &str,
        text: &str,
    ) -> anyhow::Result<SendReceipt> {
        Ok(self.send(instance, to, OutboundMessage::text(text)).await?)
    }

    async fn send_message(
        &self,
        instance: &InstanceKey,
        to: &str,
        message: OutboundMessage,
    ) -> anyhow::Result<SendReceipt> {
        Ok(self.send(instance, to, message).await?)
    }
}

fn require(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

/// Field checks that must pass before any network traffic happens.
pub fn check_message(message: &OutboundMessage) -> Result<(), String> {
    match message {
        OutboundMessage::Text { text, .. } => require(text, "text"),
        OutboundMessage::Media {
            media, url, ptt, ..
        } => {
            require(url, "url")?;
            if *ptt && *media != MediaKind::Audio {
                return Err("only audio can be sent as a voice note".into());
            }
            Ok(())
        },
        OutboundMessage::Contact { name, phone, .. } => {
            require(name, "name")?;
            if !phone.chars().any(|c| c.is_ascii_digit()) {
                return Err("contact phone must contain digits".into());
            }
            Ok(())
        },
        OutboundMessage::Voice { url, .. } => require(url, "url"),
        OutboundMessage::Location {
            latitude,
            longitude,
            ..
        } => {
            if !(-90.0..=90.0).contains(latitude) {
                return Err(format!("latitude {latitude} out of range"));
            }
            if !(-180.0..=180.0).contains(longitude) {
                return Err(format!("longitude {longitude} out of range"));
            }
            Ok(())
        },
        OutboundMessage::Interactive {
            title,
            body,
            buttons,
            ..
        } => {
            require(title, "title")?;
            require(body, "body")?;
            if buttons.is_empty() || buttons.len() > MAX_BUTTONS {
                return Err(format!("between 1 and {MAX_BUTTONS} buttons are required"));
            }
            let mut ids = HashSet::new();
            for button in buttons {
                require(&button.id, "button id")?;
                require(&button.title, "button title")?;
                if !ids.insert(button.id.as_str()) {
                    return Err(format!("duplicate button id '{}'", button.id));
                }
            }
            Ok(())
        },
    }
}
