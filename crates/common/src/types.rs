use std::fmt;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Key addressing one tenant session in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A fresh key: 32 lowercase hex characters.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Digit string the provider recognizes as an existing contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalNumber(String);

impl CanonicalNumber {
    /// Suffix the network uses to address individual users.
    pub const USER_SUFFIX: &'static str = "@s.whatsapp.net";

    pub fn new(digits: impl Into<String>) -> Self {
        Self(digits.into())
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Full network address, e.g. `5511988053918@s.whatsapp.net`.
    pub fn jid(&self) -> String {
        format!("{}{}", self.0, Self::USER_SUFFIX)
    }
}

impl fmt::Display for CanonicalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the provider assigns to an accepted outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Session state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Created,
    Connecting,
    AwaitingScan,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Whether a pairing handshake is underway.
    pub fn is_pairing(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingScan)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    MessageReceived,
    DeliveryReceipt,
    PresenceUpdate,
    MessageSentAck,
    MessageSendError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::MessageReceived => "message_received",
            Self::DeliveryReceipt => "delivery_receipt",
            Self::PresenceUpdate => "presence_update",
            Self::MessageSentAck => "message_sent_ack",
            Self::MessageSendError => "message_send_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event pushed by the provider for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub tenant: InstanceKey,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(tenant: InstanceKey, kind: EventKind, payload: Value) -> Self {
        Self {
            tenant,
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Message text, from either the flat bridge shape or the raw protocol shape.
    pub fn text(&self) -> Option<&str> {
        let p = &self.payload;
        p.get("text")
            .and_then(Value::as_str)
            .or_else(|| p.get("message").and_then(Value::as_str))
            .or_else(|| p.pointer("/message/conversation").and_then(Value::as_str))
            .or_else(|| {
                p.pointer("/message/extendedTextMessage/text")
                    .and_then(Value::as_str)
            })
            .filter(|t| !t.is_empty())
    }

    /// Address of the peer that sent the message.
    pub fn sender(&self) -> Option<&str> {
        ["from", "sender", "source_string"]
            .iter()
            .find_map(|k| self.payload.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }

    pub fn is_from_me(&self) -> bool {
        ["is_from_me", "from_me"]
            .iter()
            .find_map(|k| self.payload.get(*k).and_then(Value::as_bool))
            .unwrap_or(false)
    }

    pub fn is_group(&self) -> bool {
        self.payload
            .get("is_group")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| self.sender().is_some_and(|s| s.ends_with("@g.us")))
    }

    /// Phone identity reported with a `Connected` event.
    pub fn phone_identity(&self) -> Option<&str> {
        ["phone_number", "phone"]
            .iter()
            .find_map(|k| self.payload.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }

    /// Free-form reason attached to `Disconnected` or error events.
    pub fn reason(&self) -> Option<&str> {
        ["reason", "error"]
            .iter()
            .find_map(|k| self.payload.get(*k).and_then(Value::as_str))
    }
}

// ── Outbound messages ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// Message content handed to the provider, one variant per message kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    Media {
        media: MediaKind,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        /// Audio only: deliver as a voice note instead of an audio file.
        #[serde(default)]
        ptt: bool,
    },
    Contact {
        name: String,
        phone: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    Voice {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    Interactive {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
        buttons: Vec<ReplyButton>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            reply_to: None,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { .. } => "media",
            Self::Contact { .. } => "contact",
            Self::Voice { .. } => "voice",
            Self::Location { .. } => "location",
            Self::Interactive { .. } => "interactive",
        }
    }
}
