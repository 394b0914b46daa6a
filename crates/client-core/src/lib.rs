//! Message reconciliation engine for the WrenChat client.
//!
//! Owns the authoritative, de-duplicated, ordered message view of one open
//! conversation, merging a pull-based history fetch, push events from the
//! live channel, and locally originated optimistic entries.

/// Async channel pair carrying live-event traffic.
pub mod channel;
/// Stable client error types and HTTP classification helpers.
pub mod error;
/// Boundary normalization of loosely-typed backend records.
pub mod normalize;
/// Optimistic entry tracking and preview-resource lifecycle.
pub mod pending;
/// Typing indicator and presence staleness tracking.
pub mod presence;
/// Backoff policy used by refetch loops.
pub mod retry;
/// Per-conversation reconciliation session.
pub mod session;
/// Ordered, de-duplicated message store.
pub mod store;
/// Canonical model, wire records, and channel protocol types.
pub mod types;

pub use channel::{EventChannelError, EventChannels, InboundStream, next_event};
pub use error::{ClientError, ErrorCategory, classify_http_status};
pub use normalize::{normalize_message_record, parse_delivery_state};
pub use pending::{PendingEntry, PendingTracker, PreviewHandle, PreviewRevoker};
pub use presence::{PresenceTracker, TypingTracker};
pub use retry::RetryPolicy;
pub use session::{ConversationSession, HistoryState, QueuedSend};
pub use store::MessageStore;
pub use types::{
    AttachmentKind, ChannelEvent, ConversationSummary, DeliveryState, EngineConfig, Message,
    MessageBody, MessageKind, OutboundEvent, PENDING_ID_PREFIX, PresenceStatus, RawMessageRecord,
    RawPresenceRecord, RawSenderRecord, UploadResponse,
};
