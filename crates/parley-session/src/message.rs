//! Instant message payloads exchanged with the protocol engine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Handle;

/// Message type attribute (RFC 6121 Section 5.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MessageKind {
    #[default]
    Normal,
    Chat,
    GroupChat,
    Headline,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Normal => "normal",
            MessageKind::Chat => "chat",
            MessageKind::GroupChat => "groupchat",
            MessageKind::Headline => "headline",
            MessageKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "chat" => MessageKind::Chat,
            "groupchat" => MessageKind::GroupChat,
            "headline" => MessageKind::Headline,
            "error" => MessageKind::Error,
            _ => MessageKind::Normal,
        }
    }
}

/// Chat state notifications (XEP-0085).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

impl ChatState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatState::Active => "active",
            ChatState::Composing => "composing",
            ChatState::Paused => "paused",
            ChatState::Inactive => "inactive",
            ChatState::Gone => "gone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "active" => ChatState::Active,
            "composing" => ChatState::Composing,
            "paused" => ChatState::Paused,
            "inactive" => ChatState::Inactive,
            "gone" => ChatState::Gone,
            _ => return None,
        })
    }
}

/// Chat marker kinds (XEP-0333), plus the XEP-0184 receipt which the core
/// treats as a `Received` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkerKind {
    Received,
    Displayed,
    Acknowledged,
}

impl MarkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::Received => "received",
            MarkerKind::Displayed => "displayed",
            MarkerKind::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "received" => MarkerKind::Received,
            "displayed" => MarkerKind::Displayed,
            "acknowledged" => MarkerKind::Acknowledged,
            _ => return None,
        })
    }
}

/// A marker referring to an earlier message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMarker {
    pub kind: MarkerKind,
    pub id: String,
}

/// A message stanza as delivered by the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InboundMessage {
    /// Full address of the sender
    pub from: String,
    pub id: Option<String>,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub subject: Option<String>,
    /// Delayed delivery stamp, if the message was stored
    pub stamp: Option<DateTime<Utc>>,
    pub chat_state: Option<ChatState>,
    pub marker: Option<ChatMarker>,
    /// Sender asked for a delivery receipt or markers
    pub receipt_requested: bool,
}

impl InboundMessage {
    pub fn chat(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            kind: MessageKind::Chat,
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A message stanza for the engine to send.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    pub id: String,
    pub to: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub chat_state: Option<ChatState>,
    pub marker: Option<ChatMarker>,
    pub request_receipt: bool,
}

/// One part of a message as exchanged with hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePart {
    pub content_type: String,
    pub content: String,
}

impl MessagePart {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content_type: "text/plain".to_string(),
            content: content.into(),
        }
    }
}

/// Telepathy message types carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelTextMessageType {
    Normal = 0,
    Action = 1,
    Notice = 2,
    AutoReply = 3,
    DeliveryReport = 4,
}

/// Delivery states reported through delivery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryStatus {
    Unknown = 0,
    Delivered = 1,
    TemporarilyFailed = 2,
    PermanentlyFailed = 3,
    Accepted = 4,
    Read = 5,
    Deleted = 6,
}

impl From<MarkerKind> for DeliveryStatus {
    fn from(kind: MarkerKind) -> Self {
        match kind {
            MarkerKind::Acknowledged => DeliveryStatus::Read,
            MarkerKind::Displayed | MarkerKind::Received => DeliveryStatus::Delivered,
        }
    }
}

/// Header of a message queued for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    pub pending_id: u32,
    pub token: String,
    pub message_type: ChannelTextMessageType,
    pub sent: Option<DateTime<Utc>>,
    pub received: DateTime<Utc>,
    pub sender: Handle,
    pub sender_id: String,
    /// For delivery reports: the token of the message being reported on
    pub delivery_token: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
}

/// A message waiting in a channel until the host acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedMessage {
    pub header: MessageHeader,
    pub parts: Vec<MessagePart>,
}

/// Flags a host passes when sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendFlags {
    pub report_delivery: bool,
    pub report_read: bool,
}

impl SendFlags {
    pub fn wants_reports(&self) -> bool {
        self.report_delivery || self.report_read
    }
}
