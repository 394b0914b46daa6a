use tracing::warn;

use crate::types::{
    AttachmentKind, DeliveryState, Message, MessageBody, MessageKind, RawMessageRecord,
};

/// Convert a loosely-typed backend record into a canonical message.
///
/// Field fallbacks, applied in order, first match wins:
/// - identity: `messageId`, then `id`; no identity drops the record
/// - sender: nested sender object id, then flat `senderId`; none drops it
/// - kind: explicit kind string; absent or unknown strings are inferred
///   (locator present + empty text => image, otherwise text)
/// - text payload: `content`, then legacy `text`, then empty
/// - timestamp: `createdAtMs`, then `timestampMs`, then `received_at_ms`
///
/// Returns `None` for records that cannot be represented; this is a policy
/// decision at the boundary, never an error.
pub fn normalize_message_record(
    record: RawMessageRecord,
    received_at_ms: u64,
) -> Option<Message> {
    let Some(id) = non_empty(record.message_id).or_else(|| non_empty(record.id)) else {
        warn!("discarding message record without identity");
        return None;
    };

    let Some(conversation_id) = non_empty(record.conversation_id) else {
        warn!(message_id = %id, "discarding message record without conversation");
        return None;
    };

    let sender_id = record
        .sender
        .and_then(|sender| non_empty(sender.id))
        .or_else(|| non_empty(record.sender_id));
    let Some(sender_id) = sender_id else {
        warn!(message_id = %id, "discarding message record without sender");
        return None;
    };

    let text = record
        .content
        .or(record.text)
        .unwrap_or_default();
    let locator = non_empty(record.attachment_url);
    let kind = resolve_kind(record.kind.as_deref(), locator.as_deref(), &text);

    let body = match kind {
        MessageKind::Text => MessageBody::Text(text),
        MessageKind::Image | MessageKind::Pdf => {
            // Some backend builds stuff the URL into the content field of a
            // media record instead of the locator field.
            let Some(locator) = locator.or_else(|| non_empty(Some(text))) else {
                warn!(message_id = %id, "discarding media record without locator");
                return None;
            };
            MessageBody::Attachment {
                kind: if kind == MessageKind::Pdf {
                    AttachmentKind::Pdf
                } else {
                    AttachmentKind::Image
                },
                locator,
                file_name: non_empty(record.file_name),
            }
        }
    };

    Some(Message {
        id,
        conversation_id,
        sender_id,
        body,
        created_at_ms: record
            .created_at_ms
            .or(record.timestamp_ms)
            .unwrap_or(received_at_ms),
        delivery_state: parse_delivery_state(record.delivery_state.as_deref()),
        is_pending: false,
    })
}

/// Lenient wire string to delivery state. Unknown or absent values count as
/// freshly sent.
pub fn parse_delivery_state(raw: Option<&str>) -> DeliveryState {
    match raw.map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("seen") => DeliveryState::Seen,
        Some(value) if value.eq_ignore_ascii_case("delivered") => DeliveryState::Delivered,
        _ => DeliveryState::Sent,
    }
}

fn resolve_kind(raw: Option<&str>, locator: Option<&str>, text: &str) -> MessageKind {
    match raw.map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("text") => MessageKind::Text,
        Some(value) if value.eq_ignore_ascii_case("image") => MessageKind::Image,
        Some(value) if value.eq_ignore_ascii_case("pdf") => MessageKind::Pdf,
        other => {
            if let Some(value) = other.filter(|value| !value.is_empty()) {
                warn!(kind = %value, "unknown message kind; inferring from payload");
            }
            if locator.is_some() && text.trim().is_empty() {
                MessageKind::Image
            } else {
                MessageKind::Text
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
