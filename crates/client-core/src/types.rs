use serde::{Deserialize, Serialize};

/// Namespace tag prefixing locally assigned optimistic message ids.
pub const PENDING_ID_PREFIX: &str = "pending-send-";

/// Closed set of message kinds understood by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text message.
    Text,
    /// Uploaded image attachment.
    Image,
    /// Uploaded PDF attachment.
    Pdf,
}

/// Attachment flavor carried by media messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Pdf,
}

impl AttachmentKind {
    /// Widen to the full message-kind set.
    pub fn as_message_kind(self) -> MessageKind {
        match self {
            Self::Image => MessageKind::Image,
            Self::Pdf => MessageKind::Pdf,
        }
    }
}

/// Message payload: a text body, or a resource locator for an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Attachment {
        kind: AttachmentKind,
        /// URL identifying the uploaded (or locally previewed) file.
        locator: String,
        /// Original filename when the backend reported one.
        file_name: Option<String>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Attachment { kind, .. } => kind.as_message_kind(),
        }
    }

    /// Text body for text messages.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(body) => Some(body),
            Self::Attachment { .. } => None,
        }
    }

    /// Resource locator for attachment messages.
    pub fn locator(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Attachment { locator, .. } => Some(locator),
        }
    }
}

/// Delivery progression reported by the backend.
///
/// Variant order is the transition order; the store only moves this forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Seen,
}

/// Canonical, store-owned message for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned id, or a `pending-send-*` id before confirmation.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Sending user.
    pub sender_id: String,
    /// Text body or attachment payload.
    pub body: MessageBody,
    /// Creation timestamp in milliseconds since Unix epoch; authoritative
    /// ordering key.
    pub created_at_ms: u64,
    /// Current delivery progression.
    pub delivery_state: DeliveryState,
    /// True while this is a local optimistic entry awaiting confirmation.
    pub is_pending: bool,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self.body, MessageBody::Attachment { .. })
    }

    /// Whether this message carries a local (unconfirmed) identity.
    pub fn has_pending_id(&self) -> bool {
        self.id.starts_with(PENDING_ID_PREFIX)
    }

    /// Short human-readable preview used for conversation summaries.
    pub fn preview_text(&self) -> String {
        match &self.body {
            MessageBody::Text(body) => body.clone(),
            MessageBody::Attachment {
                kind, file_name, ..
            } => {
                let label = match kind {
                    AttachmentKind::Image => "Image",
                    AttachmentKind::Pdf => "PDF",
                };
                match file_name {
                    Some(name) => format!("{label}: {name}"),
                    None => label.to_owned(),
                }
            }
        }
    }
}

/// Last-message summary fields mutated as a side effect of processing
/// new messages for a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// The single other participant.
    pub peer_id: String,
    pub last_message_preview: Option<String>,
    pub last_activity_ms: Option<u64>,
}

/// Online/last-seen status for a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceStatus {
    pub is_online: bool,
    pub last_seen_ms: Option<u64>,
}

/// Tuning knobs for the reconciliation engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Window used when pairing an optimistic entry with its confirmed
    /// counterpart by sender and timestamp proximity.
    pub match_tolerance_ms: u64,
    /// Typing indicator decay after the last typing event.
    pub typing_timeout_ms: u64,
    /// Presence poll backstop interval.
    pub presence_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_tolerance_ms: 5_000,
            typing_timeout_ms: 3_000,
            presence_poll_interval_ms: 30_000,
        }
    }
}

/// Loosely-typed message record as received from the REST API or the live
/// event channel.
///
/// Every field is optional. The backend is inconsistent about which of the
/// overlapping fields it populates; `normalize` applies the resolution
/// fallbacks and nothing past that boundary trusts this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessageRecord {
    /// Server-assigned message id.
    pub message_id: Option<String>,
    /// Generic id field populated by some backend builds instead.
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    /// Nested sender object.
    pub sender: Option<RawSenderRecord>,
    /// Flat sender id populated when the sender object is absent.
    pub sender_id: Option<String>,
    /// Kind discriminator ("text", "image", "pdf") when present.
    pub kind: Option<String>,
    pub content: Option<String>,
    /// Legacy text field still emitted by older backend builds.
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at_ms: Option<u64>,
    /// Generic timestamp populated when `createdAtMs` is absent.
    pub timestamp_ms: Option<u64>,
    pub delivery_state: Option<String>,
}

/// Nested sender object inside a raw message record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSenderRecord {
    pub id: Option<String>,
}

/// Presence record returned by the status fetch endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPresenceRecord {
    pub is_online: bool,
    pub last_seen_ms: Option<u64>,
}

/// Response of the opaque file upload call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// URL of the uploaded resource.
    pub locator: String,
    /// Kind reported by the upload endpoint, when present.
    pub kind: Option<String>,
    /// Original filename as stored by the backend.
    pub file_name: Option<String>,
}

/// Inbound push events delivered over the live event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChannelEvent {
    /// A new message was appended to some conversation.
    MessageReceived(RawMessageRecord),
    /// Delivery progression changed for an existing message.
    MessageStatusUpdated {
        message_id: String,
        /// Raw state string; parsed leniently.
        new_state: String,
    },
    TypingStarted {
        conversation_id: String,
        user_id: String,
    },
    TypingStopped {
        conversation_id: String,
        user_id: String,
    },
    PresenceChanged {
        user_id: String,
        is_online: bool,
        last_seen_ms: Option<u64>,
    },
}

/// Events the client publishes onto the live event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    SendMessage {
        conversation_id: String,
        kind: MessageKind,
        content: Option<String>,
        attachment_url: Option<String>,
        file_name: Option<String>,
    },
    TypingStarted {
        conversation_id: String,
        user_id: String,
    },
    TypingStopped {
        conversation_id: String,
        user_id: String,
    },
    /// Acknowledge local delivery of a peer message.
    DeliveryAcknowledged { message_id: String },
}
