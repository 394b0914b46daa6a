use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::types::{DeliveryState, Message, MessageBody};

/// Ordered, de-duplicated message collection for one open conversation.
///
/// Entries are keyed by message identity. The rendered view is recomputed on
/// demand; ordering is ascending `created_at_ms` with ties broken by
/// insertion order.
#[derive(Debug, Clone)]
pub struct MessageStore {
    conversation_id: String,
    entries: HashMap<String, StoredMessage>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    message: Message,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.entries.get(message_id).map(|entry| &entry.message)
    }

    /// Merge a full history fetch into the store.
    ///
    /// The merge is non-destructive: pending entries and messages already
    /// delivered over the live channel survive. Calling twice with the same
    /// input yields the same state.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        let incoming = messages.len();
        for message in messages {
            self.upsert(message);
        }
        debug!(
            conversation_id = %self.conversation_id,
            incoming,
            stored = self.entries.len(),
            "history merged"
        );
    }

    /// Insert or overwrite by identity.
    ///
    /// Returns `false` when the message was not persisted (whitespace-only
    /// text is silently dropped). Overwriting keeps the existing entry's
    /// insertion order and never regresses its delivery state.
    pub fn upsert(&mut self, message: Message) -> bool {
        if is_blank_text(&message) {
            trace!(
                conversation_id = %self.conversation_id,
                message_id = %message.id,
                "dropping whitespace-only text message"
            );
            return false;
        }

        match self.entries.get_mut(&message.id) {
            Some(existing) => {
                let kept_state = existing.message.delivery_state.max(message.delivery_state);
                existing.message = message;
                existing.message.delivery_state = kept_state;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries
                    .insert(message.id.clone(), StoredMessage { seq, message });
            }
        }
        true
    }

    /// Collapse a pending entry into its confirmed counterpart.
    ///
    /// The confirmed message inherits the pending slot's insertion order, so
    /// the bubble does not jump when the server id arrives. Falls back to a
    /// plain upsert when the pending id is unknown.
    pub fn replace_pending(&mut self, pending_id: &str, confirmed: Message) -> bool {
        if is_blank_text(&confirmed) {
            // The confirmed record is unusable; drop the pending entry so the
            // collapse still leaves a single (here: zero) canonical message.
            warn!(
                conversation_id = %self.conversation_id,
                pending_id,
                "confirmed counterpart had blank text; removing pending entry"
            );
            self.entries.remove(pending_id);
            return false;
        }

        match self.entries.remove(pending_id) {
            Some(slot) => {
                self.entries.insert(
                    confirmed.id.clone(),
                    StoredMessage {
                        seq: slot.seq,
                        message: confirmed,
                    },
                );
                true
            }
            None => self.upsert(confirmed),
        }
    }

    pub fn remove(&mut self, message_id: &str) -> Option<Message> {
        self.entries.remove(message_id).map(|entry| entry.message)
    }

    /// Apply a delivery-state transition.
    ///
    /// Unknown ids are ignored, and transitions that would move the state
    /// backwards are not applied. Returns `true` when the state changed.
    pub fn update_delivery_state(&mut self, message_id: &str, new_state: DeliveryState) -> bool {
        let Some(entry) = self.entries.get_mut(message_id) else {
            trace!(message_id, "delivery update for unknown message ignored");
            return false;
        };

        if new_state <= entry.message.delivery_state {
            trace!(
                message_id,
                current = ?entry.message.delivery_state,
                requested = ?new_state,
                "ignoring non-forward delivery transition"
            );
            return false;
        }

        entry.message.delivery_state = new_state;
        true
    }

    /// Current sorted, de-duplicated view.
    pub fn snapshot(&self) -> Vec<Message> {
        let mut rows: Vec<&StoredMessage> = self.entries.values().collect();
        rows.sort_by_key(|entry| (entry.message.created_at_ms, entry.seq));
        rows.into_iter().map(|entry| entry.message.clone()).collect()
    }

    /// Most recent message under snapshot ordering.
    pub fn last_message(&self) -> Option<Message> {
        self.entries
            .values()
            .max_by_key(|entry| (entry.message.created_at_ms, entry.seq))
            .map(|entry| entry.message.clone())
    }

    /// Most recent attachment from `sender_id` within `window_ms` of `at_ms`.
    pub fn recent_attachment_from(
        &self,
        sender_id: &str,
        at_ms: u64,
        window_ms: u64,
    ) -> Option<&Message> {
        self.entries
            .values()
            .filter(|entry| {
                entry.message.is_attachment()
                    && entry.message.sender_id == sender_id
                    && at_ms.abs_diff(entry.message.created_at_ms) <= window_ms
            })
            .max_by_key(|entry| (entry.message.created_at_ms, entry.seq))
            .map(|entry| &entry.message)
    }

    /// Stored attachment from the same sender whose locator (or filename)
    /// equals `text`, within the tolerance window.
    ///
    /// Used to discard redundant text shadows the backend occasionally emits
    /// alongside a file message.
    pub fn attachment_shadowing_text(
        &self,
        text: &str,
        sender_id: &str,
        at_ms: u64,
        window_ms: u64,
    ) -> Option<&Message> {
        if text.is_empty() {
            return None;
        }
        self.entries.values().map(|entry| &entry.message).find(|message| {
            message.sender_id == sender_id
                && at_ms.abs_diff(message.created_at_ms) <= window_ms
                && match &message.body {
                    MessageBody::Attachment {
                        locator, file_name, ..
                    } => locator == text || file_name.as_deref() == Some(text),
                    MessageBody::Text(_) => false,
                }
        })
    }
}

fn is_blank_text(message: &Message) -> bool {
    matches!(&message.body, MessageBody::Text(body) if body.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachmentKind, DeliveryState, MessageBody};

    fn text(id: &str, sender: &str, body: &str, created_at_ms: u64) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: sender.to_owned(),
            body: MessageBody::Text(body.to_owned()),
            created_at_ms,
            delivery_state: DeliveryState::Sent,
            is_pending: false,
        }
    }

    fn image(id: &str, sender: &str, locator: &str, created_at_ms: u64) -> Message {
        Message {
            id: id.to_owned(),
            conversation_id: "c1".to_owned(),
            sender_id: sender.to_owned(),
            body: MessageBody::Attachment {
                kind: AttachmentKind::Image,
                locator: locator.to_owned(),
                file_name: None,
            },
            created_at_ms,
            delivery_state: DeliveryState::Sent,
            is_pending: false,
        }
    }

    #[test]
    fn snapshot_sorts_by_created_at_with_insertion_tiebreak() {
        let mut store = MessageStore::new("c1");
        store.upsert(text("m2", "u1", "second", 2_000));
        store.upsert(text("m1", "u1", "first", 1_000));
        store.upsert(text("m3", "u2", "tied-later", 2_000));

        let ids: Vec<_> = store.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn replace_history_is_idempotent() {
        let mut store = MessageStore::new("c1");
        let batch = vec![text("m1", "u1", "a", 1), text("m2", "u2", "b", 2)];

        store.replace_history(batch.clone());
        let first = store.snapshot();
        store.replace_history(batch);
        assert_eq!(store.snapshot(), first);
    }

    #[test]
    fn replace_history_keeps_pending_and_live_entries() {
        let mut store = MessageStore::new("c1");
        let mut pending = text("pending-send-1", "u1", "in flight", 3);
        pending.is_pending = true;
        store.upsert(pending);
        store.upsert(text("m9", "u2", "live before refetch", 4));

        store.replace_history(vec![text("m1", "u2", "old", 1)]);

        assert!(store.contains("pending-send-1"));
        assert!(store.contains("m9"));
        assert!(store.contains("m1"));
    }

    #[test]
    fn whitespace_only_text_is_never_persisted() {
        let mut store = MessageStore::new("c1");
        assert!(!store.upsert(text("m1", "u1", "   ", 1)));
        assert!(!store.contains("m1"));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn upsert_overwrite_keeps_insertion_order() {
        let mut store = MessageStore::new("c1");
        store.upsert(text("m1", "u1", "v1", 5_000));
        store.upsert(text("m2", "u1", "other", 5_000));
        store.upsert(text("m1", "u1", "v2", 5_000));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "m1");
        assert_eq!(snapshot[0].body, MessageBody::Text("v2".to_owned()));
        assert_eq!(snapshot[1].id, "m2");
    }

    #[test]
    fn delivery_state_only_moves_forward() {
        let mut store = MessageStore::new("c1");
        store.upsert(text("m1", "u1", "hello", 1));

        assert!(store.update_delivery_state("m1", DeliveryState::Seen));
        assert!(!store.update_delivery_state("m1", DeliveryState::Delivered));
        assert_eq!(
            store.get("m1").expect("message should exist").delivery_state,
            DeliveryState::Seen
        );
    }

    #[test]
    fn delivery_update_for_unknown_id_is_a_noop() {
        let mut store = MessageStore::new("c1");
        assert!(!store.update_delivery_state("m404", DeliveryState::Seen));
    }

    #[test]
    fn overwrite_never_regresses_delivery_state() {
        let mut store = MessageStore::new("c1");
        store.upsert(text("m1", "u1", "hello", 1));
        store.update_delivery_state("m1", DeliveryState::Seen);

        // A stale history refetch still reports the initial state.
        store.upsert(text("m1", "u1", "hello", 1));
        assert_eq!(
            store.get("m1").expect("message should exist").delivery_state,
            DeliveryState::Seen
        );
    }

    #[test]
    fn replace_pending_collapses_into_one_entry_in_place() {
        let mut store = MessageStore::new("c1");
        let mut pending = image("pending-send-1", "u1", "blob:local/abc", 1_000);
        pending.is_pending = true;
        store.upsert(pending);
        store.upsert(text("m5", "u2", "later", 2_000));

        let confirmed = image("m6", "u1", "https://cdn.example.org/x/abc.png", 1_500);
        assert!(store.replace_pending("pending-send-1", confirmed));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!store.contains("pending-send-1"));
        // created_at still drives ordering; the inherited slot only breaks ties.
        assert_eq!(snapshot[0].id, "m6");
        assert!(!snapshot[0].is_pending);
    }

    #[test]
    fn recent_attachment_lookup_respects_sender_and_window() {
        let mut store = MessageStore::new("c1");
        store.upsert(image("m1", "u1", "https://cdn.example.org/a.png", 10_000));

        assert!(store.recent_attachment_from("u1", 12_000, 5_000).is_some());
        assert!(store.recent_attachment_from("u2", 12_000, 5_000).is_none());
        assert!(store.recent_attachment_from("u1", 20_000, 5_000).is_none());
    }

    #[test]
    fn attachment_shadow_matches_locator_and_filename() {
        let mut store = MessageStore::new("c1");
        let mut with_name = image("m1", "u1", "https://cdn.example.org/a.png", 10_000);
        if let MessageBody::Attachment { file_name, .. } = &mut with_name.body {
            *file_name = Some("a.png".to_owned());
        }
        store.upsert(with_name);

        assert!(
            store
                .attachment_shadowing_text("https://cdn.example.org/a.png", "u1", 11_000, 5_000)
                .is_some()
        );
        assert!(
            store
                .attachment_shadowing_text("a.png", "u1", 11_000, 5_000)
                .is_some()
        );
        assert!(
            store
                .attachment_shadowing_text("unrelated", "u1", 11_000, 5_000)
                .is_none()
        );
    }
}
