//! Sidecar webhook payloads → [`InboundEvent`].

use {
    chrono::{DateTime, Utc},
    serde::Deserialize,
    serde_json::{Map, Value, json},
    tracing::debug,
    zapgate_common::{EventKind, InboundEvent, InstanceKey},
};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("webhook payload has no instance key")]
    MissingInstance,
    #[error("webhook payload has no event name")]
    MissingEvent,
}

/// Envelope the sidecar posts for every event.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(alias = "instance_key")]
    instance: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Value,
}

/// Map a sidecar event name onto the kinds the dispatcher routes.
pub fn event_kind(name: &str) -> Option<EventKind> {
    let kind = match name {
        "connected" | "pair_success" | "instance_connected" | "instance_manually_connected" => {
            EventKind::Connected
        },
        "disconnected"
        | "logged_out"
        | "stream_replaced"
        | "instance_disconnected"
        | "instance_manually_disconnected" => EventKind::Disconnected,
        "message_delivered" | "message_read" | "message_played" | "message_receipt" => {
            EventKind::DeliveryReceipt
        },
        "presence_update" | "chat_presence_update" => EventKind::PresenceUpdate,
        "message_sent" => EventKind::MessageSentAck,
        "message_error" => EventKind::MessageSendError,
        n if n.ends_with("_received") => EventKind::MessageReceived,
        _ => return None,
    };
    Some(kind)
}

/// Parse one webhook body. Returns `Ok(None)` for events nothing listens to.
pub fn parse_webhook(body: Value) -> Result<Option<InboundEvent>, WebhookError> {
    let envelope: Envelope = serde_json::from_value(body)?;
    if envelope.instance.trim().is_empty() {
        return Err(WebhookError::MissingInstance);
    }

    let name = envelope
        .event_type
        .as_deref()
        .or(envelope.event.as_deref())
        .ok_or(WebhookError::MissingEvent)?;
    let Some(kind) = event_kind(name) else {
        debug!(event = name, instance = %envelope.instance, "ignoring webhook event");
        return Ok(None);
    };

    let payload = match kind {
        EventKind::MessageReceived => flatten_message(envelope.data),
        _ => envelope.data,
    };

    Ok(Some(InboundEvent {
        tenant: InstanceKey::new(envelope.instance),
        kind,
        payload,
        occurred_at: envelope.timestamp.unwrap_or_else(Utc::now),
    }))
}

/// Lift the interesting fields of a raw protocol message (`Info` + `Message`)
/// to the flat shape [`InboundEvent`] accessors read. Flat payloads pass through.
fn flatten_message(data: Value) -> Value {
    let Some(info) = data.get("Info").or_else(|| data.get("info")).cloned() else {
        return data;
    };
    let message = data
        .get("Message")
        .or_else(|| data.get("message"))
        .cloned()
        .unwrap_or(Value::Null);

    let field = |k: &str| info.get(k).cloned().unwrap_or(Value::Null);
    let from = info
        .get("Chat")
        .or_else(|| info.get("Sender"))
        .cloned()
        .unwrap_or(Value::Null);

    let mut flat = Map::new();
    flat.insert("from".into(), from);
    flat.insert("sender".into(), field("Sender"));
    flat.insert("is_from_me".into(), json!(field("IsFromMe").as_bool().unwrap_or(false)));
    flat.insert("is_group".into(), json!(field("IsGroup").as_bool().unwrap_or(false)));
    flat.insert("message_id".into(), field("ID"));
    flat.insert("push_name".into(), field("PushName"));
    flat.insert("message".into(), message);
    Value::Object(flat)
}
