use tracing::{debug, info, trace, warn};

use crate::{
    error::ClientError,
    normalize::{normalize_message_record, parse_delivery_state},
    pending::{PendingTracker, PreviewHandle},
    presence::{PresenceTracker, TypingTracker},
    store::MessageStore,
    types::{
        AttachmentKind, ChannelEvent, ConversationSummary, DeliveryState, EngineConfig, Message,
        MessageBody, MessageKind, OutboundEvent, PresenceStatus, RawMessageRecord,
        RawPresenceRecord, UploadResponse,
    },
};

/// History fetch progress for the open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    NotLoaded,
    Loaded,
    /// The fetch failed; the store keeps its last-known-good contents and the
    /// error is retryable.
    Failed(ClientError),
}

/// A queued optimistic text send: the locally visible entry plus the event to
/// transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedSend {
    pub pending_id: String,
    pub outbound: OutboundEvent,
}

/// Reconciliation engine for one open conversation.
///
/// Owns the message store, the optimistic entries, and the ephemeral
/// typing/presence state. All mutation happens on discrete event callbacks
/// with an injected clock; arrival order of history, live events, and
/// optimistic creations does not change the final snapshot.
#[derive(Debug)]
pub struct ConversationSession {
    conversation_id: String,
    self_user_id: String,
    peer_id: String,
    config: EngineConfig,
    store: MessageStore,
    pending: PendingTracker,
    typing: TypingTracker,
    presence: PresenceTracker,
    history: HistoryState,
}

impl ConversationSession {
    pub fn new(
        conversation_id: impl Into<String>,
        self_user_id: impl Into<String>,
        peer_id: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        let conversation_id = conversation_id.into();
        info!(%conversation_id, "opening conversation session");
        Self {
            store: MessageStore::new(conversation_id.clone()),
            conversation_id,
            self_user_id: self_user_id.into(),
            peer_id: peer_id.into(),
            typing: TypingTracker::new(config.typing_timeout_ms),
            presence: PresenceTracker::new(config.presence_poll_interval_ms),
            config,
            pending: PendingTracker::new(),
            history: HistoryState::NotLoaded,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn history_state(&self) -> &HistoryState {
        &self.history
    }

    /// Current sorted, de-duplicated message view.
    pub fn snapshot(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    /// Last-message summary fields for the conversation list.
    pub fn conversation_summary(&self) -> ConversationSummary {
        let last = self.store.last_message();
        ConversationSummary {
            conversation_id: self.conversation_id.clone(),
            peer_id: self.peer_id.clone(),
            last_message_preview: last.as_ref().map(Message::preview_text),
            last_activity_ms: last.map(|message| message.created_at_ms),
        }
    }

    /// Merge a full history fetch response.
    ///
    /// Safe to call again on refetch: pending entries and messages already
    /// delivered over the live channel are preserved, and repeating the same
    /// input leaves the store unchanged.
    pub fn apply_history(&mut self, records: Vec<RawMessageRecord>, now_ms: u64) {
        let batch = records.len();
        for record in records {
            let Some(message) = normalize_message_record(record, now_ms) else {
                continue;
            };
            if message.conversation_id != self.conversation_id {
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    "history record for foreign conversation ignored"
                );
                continue;
            }
            self.absorb_confirmed(message);
        }
        self.history = HistoryState::Loaded;
        debug!(
            conversation_id = %self.conversation_id,
            batch,
            stored = self.store.len(),
            "history applied"
        );
    }

    /// Record a failed history fetch, keeping the store at last-known-good.
    pub fn history_failed(&mut self, error: ClientError) {
        warn!(
            conversation_id = %self.conversation_id,
            error = %error,
            "history fetch failed; keeping previous messages"
        );
        self.history = HistoryState::Failed(error);
    }

    /// Start an optimistic text send.
    ///
    /// The entry is visible in the snapshot immediately; the caller transmits
    /// the returned outbound event without blocking on it. Empty input
    /// produces no send.
    pub fn begin_text_send(&mut self, body: &str, now_ms: u64) -> Option<QueuedSend> {
        let body = body.trim();
        if body.is_empty() {
            debug!("ignoring empty text send");
            return None;
        }

        let pending_id = self.pending.allocate_id();
        self.pending
            .track_text(pending_id.clone(), self.self_user_id.clone(), now_ms);
        self.store.upsert(Message {
            id: pending_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.self_user_id.clone(),
            body: MessageBody::Text(body.to_owned()),
            created_at_ms: now_ms,
            delivery_state: DeliveryState::Sent,
            is_pending: true,
        });

        Some(QueuedSend {
            outbound: OutboundEvent::SendMessage {
                conversation_id: self.conversation_id.clone(),
                kind: MessageKind::Text,
                content: Some(body.to_owned()),
                attachment_url: None,
                file_name: None,
            },
            pending_id,
        })
    }

    /// Resolve a text send with the backend response.
    ///
    /// Returns `false` on failure. The optimistic entry is intentionally kept
    /// on failure so the user still sees what they tried to send; file sends
    /// behave differently (see `complete_attachment_upload`).
    pub fn complete_text_send(
        &mut self,
        pending_id: &str,
        result: Result<RawMessageRecord, ClientError>,
        now_ms: u64,
    ) -> bool {
        match result {
            Ok(record) => {
                let Some(message) = normalize_message_record(record, now_ms) else {
                    // The send worked; a usable copy will arrive over the
                    // live channel and reconcile by the heuristic match.
                    warn!(pending_id, "unusable send response; awaiting live copy");
                    return true;
                };
                if self.pending.extinguish(pending_id).is_some() {
                    debug!(pending_id, message_id = %message.id, "text send confirmed");
                    self.store.replace_pending(pending_id, message);
                } else {
                    // The live event won the race and already collapsed the
                    // pending entry.
                    self.absorb_confirmed(message);
                }
                true
            }
            Err(error) => {
                warn!(pending_id, error = %error, "text send failed; entry kept");
                false
            }
        }
    }

    /// Start an optimistic file send, before the upload call is made.
    ///
    /// Image sends pass a preview handle backed by a local resource; PDF
    /// sends pass `PreviewHandle::detached` with a placeholder locator.
    /// Returns the pending id used to resolve the upload.
    pub fn begin_attachment_send(
        &mut self,
        kind: AttachmentKind,
        file_name: Option<String>,
        preview: PreviewHandle,
        now_ms: u64,
    ) -> String {
        let pending_id = self.pending.allocate_id();
        self.store.upsert(Message {
            id: pending_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.self_user_id.clone(),
            body: MessageBody::Attachment {
                kind,
                locator: preview.locator().to_owned(),
                file_name: file_name.clone(),
            },
            created_at_ms: now_ms,
            delivery_state: DeliveryState::Sent,
            is_pending: true,
        });
        self.pending.track_attachment(
            pending_id.clone(),
            self.self_user_id.clone(),
            now_ms,
            kind.as_message_kind(),
            preview,
        );
        pending_id
    }

    /// Resolve a file upload.
    ///
    /// On success the pending entry's payload switches to the server-returned
    /// locator and the message event for the channel is returned. On failure
    /// the entry is removed and its preview released.
    pub fn complete_attachment_upload(
        &mut self,
        pending_id: &str,
        result: Result<UploadResponse, ClientError>,
    ) -> Option<OutboundEvent> {
        match result {
            Ok(response) => {
                if !self.pending.set_locator(pending_id, response.locator.clone()) {
                    return None;
                }
                let Some(existing) = self.store.get(pending_id).cloned() else {
                    warn!(pending_id, "uploaded entry missing from store");
                    return None;
                };
                let MessageBody::Attachment {
                    kind, file_name, ..
                } = existing.body.clone()
                else {
                    warn!(pending_id, "uploaded entry is not an attachment");
                    return None;
                };

                let file_name = response.file_name.or(file_name);
                self.store.upsert(Message {
                    body: MessageBody::Attachment {
                        kind,
                        locator: response.locator.clone(),
                        file_name: file_name.clone(),
                    },
                    ..existing
                });

                Some(OutboundEvent::SendMessage {
                    conversation_id: self.conversation_id.clone(),
                    kind: kind.as_message_kind(),
                    content: None,
                    attachment_url: Some(response.locator),
                    file_name,
                })
            }
            Err(error) => {
                warn!(pending_id, error = %error, "upload failed; removing entry");
                self.store.remove(pending_id);
                self.pending.discard(pending_id);
                None
            }
        }
    }

    /// Feed one inbound channel event.
    ///
    /// Events scoped to other conversations are ignored. Returns an outbound
    /// event when the engine owes the backend a reaction (currently: delivery
    /// acknowledgements for stored peer messages).
    pub fn handle_event(&mut self, event: ChannelEvent, now_ms: u64) -> Option<OutboundEvent> {
        match event {
            ChannelEvent::MessageReceived(record) => self.handle_message_received(record, now_ms),
            ChannelEvent::MessageStatusUpdated {
                message_id,
                new_state,
            } => {
                self.store
                    .update_delivery_state(&message_id, parse_delivery_state(Some(&new_state)));
                None
            }
            ChannelEvent::TypingStarted {
                conversation_id,
                user_id,
            } => {
                if conversation_id == self.conversation_id && user_id != self.self_user_id {
                    self.typing.on_typing_started(now_ms);
                }
                None
            }
            ChannelEvent::TypingStopped {
                conversation_id,
                user_id,
            } => {
                if conversation_id == self.conversation_id && user_id != self.self_user_id {
                    self.typing.on_typing_stopped();
                }
                None
            }
            ChannelEvent::PresenceChanged {
                user_id,
                is_online,
                last_seen_ms,
            } => {
                if user_id == self.peer_id {
                    self.presence.apply_push(
                        PresenceStatus {
                            is_online,
                            last_seen_ms,
                        },
                        now_ms,
                    );
                }
                None
            }
        }
    }

    fn handle_message_received(
        &mut self,
        record: RawMessageRecord,
        now_ms: u64,
    ) -> Option<OutboundEvent> {
        let message = normalize_message_record(record, now_ms)?;
        if message.conversation_id != self.conversation_id {
            trace!(
                message_id = %message.id,
                conversation_id = %message.conversation_id,
                "event for foreign conversation ignored"
            );
            return None;
        }

        if let MessageBody::Text(text) = &message.body {
            let text = text.trim();

            // Empty trailing event the backend emits after our own file
            // sends; without the guard it would collapse the wrong entry.
            if message.sender_id == self.self_user_id
                && text.is_empty()
                && self
                    .store
                    .recent_attachment_from(
                        &self.self_user_id,
                        message.created_at_ms,
                        self.config.match_tolerance_ms,
                    )
                    .is_some()
            {
                debug!(message_id = %message.id, "discarding empty echo after file send");
                return None;
            }

            // Redundant text shadow of a file message already stored.
            if self
                .store
                .attachment_shadowing_text(
                    text,
                    &message.sender_id,
                    message.created_at_ms,
                    self.config.match_tolerance_ms,
                )
                .is_some()
            {
                debug!(message_id = %message.id, "discarding text shadow of stored attachment");
                return None;
            }
        }

        let from_peer = message.sender_id != self.self_user_id;
        let message_id = message.id.clone();
        let stored_before = self.store.contains(&message_id);
        self.absorb_confirmed(message);

        if from_peer && !stored_before && self.store.contains(&message_id) {
            return Some(OutboundEvent::DeliveryAcknowledged { message_id });
        }
        None
    }

    /// Insert a confirmed message, first collapsing any matching optimistic
    /// entry so exactly one canonical message survives per send action.
    fn absorb_confirmed(&mut self, message: Message) {
        if message.sender_id == self.self_user_id {
            if let Some(entry) = self
                .pending
                .take_match(&message, self.config.match_tolerance_ms)
            {
                debug!(
                    pending_id = %entry.id,
                    message_id = %message.id,
                    "optimistic entry reconciled with confirmed message"
                );
                self.store.replace_pending(&entry.id, message);
                return;
            }
        }
        self.store.upsert(message);
    }

    /// Typing event for the channel when the local user starts typing.
    pub fn local_typing_started(&self) -> OutboundEvent {
        OutboundEvent::TypingStarted {
            conversation_id: self.conversation_id.clone(),
            user_id: self.self_user_id.clone(),
        }
    }

    /// Typing event for the channel when the local user stops typing.
    pub fn local_typing_stopped(&self) -> OutboundEvent {
        OutboundEvent::TypingStopped {
            conversation_id: self.conversation_id.clone(),
            user_id: self.self_user_id.clone(),
        }
    }

    pub fn is_typing(&self, now_ms: u64) -> bool {
        self.typing.is_typing(now_ms)
    }

    /// Deadline for the next typing decay, for the driving scheduler.
    pub fn typing_decay_deadline_ms(&self) -> Option<u64> {
        self.typing.decay_deadline_ms()
    }

    pub fn presence(&self) -> Option<PresenceStatus> {
        self.presence.status()
    }

    pub fn presence_needs_poll(&self, now_ms: u64) -> bool {
        self.presence.needs_poll(now_ms)
    }

    /// Resolve a presence poll. Failures are retryable and keep the
    /// last-known-good status.
    pub fn apply_presence_poll(
        &mut self,
        result: Result<RawPresenceRecord, ClientError>,
        now_ms: u64,
    ) {
        match result {
            Ok(record) => self.presence.apply_poll(
                PresenceStatus {
                    is_online: record.is_online,
                    last_seen_ms: record.last_seen_ms,
                },
                now_ms,
            ),
            Err(error) => {
                warn!(
                    peer_id = %self.peer_id,
                    error = %error,
                    "presence poll failed; keeping cached status"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::types::RawSenderRecord;

    const SELF: &str = "u-self";
    const PEER: &str = "u-peer";
    const CONV: &str = "c1";

    fn session() -> ConversationSession {
        ConversationSession::new(CONV, SELF, PEER, EngineConfig::default())
    }

    fn record(id: &str, sender: &str, content: &str, created_at_ms: u64) -> RawMessageRecord {
        RawMessageRecord {
            message_id: Some(id.to_owned()),
            conversation_id: Some(CONV.to_owned()),
            sender: Some(RawSenderRecord {
                id: Some(sender.to_owned()),
            }),
            content: Some(content.to_owned()),
            created_at_ms: Some(created_at_ms),
            ..RawMessageRecord::default()
        }
    }

    fn image_record(id: &str, sender: &str, locator: &str, created_at_ms: u64) -> RawMessageRecord {
        RawMessageRecord {
            message_id: Some(id.to_owned()),
            conversation_id: Some(CONV.to_owned()),
            sender_id: Some(sender.to_owned()),
            kind: Some("image".to_owned()),
            attachment_url: Some(locator.to_owned()),
            created_at_ms: Some(created_at_ms),
            ..RawMessageRecord::default()
        }
    }

    #[test]
    fn optimistic_text_collapses_with_live_echo() {
        let mut session = session();
        session.apply_history(Vec::new(), 0);

        let queued = session
            .begin_text_send("hi", 10_000)
            .expect("non-empty send should queue");
        assert!(queued.pending_id.starts_with("pending-send-"));

        let outbound = session.handle_event(
            ChannelEvent::MessageReceived(record("m1", SELF, "hi", 10_400)),
            10_400,
        );
        assert_eq!(outbound, None);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "m1");
        assert_eq!(snapshot[0].body, MessageBody::Text("hi".to_owned()));
        assert!(!snapshot[0].is_pending);
    }

    #[test]
    fn image_pending_collapses_with_confirmed_cdn_copy() {
        let mut session = session();
        session.apply_history(Vec::new(), 0);

        let pending_id = session.begin_attachment_send(
            AttachmentKind::Image,
            None,
            PreviewHandle::detached("blob:local/abc"),
            10_000,
        );
        assert!(session.snapshot()[0].is_pending);

        session.handle_event(
            ChannelEvent::MessageReceived(image_record(
                "m1",
                SELF,
                "https://cdn.example.org/x/abc.png",
                11_000,
            )),
            11_000,
        );

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "m1");
        assert_eq!(
            snapshot[0].body.locator(),
            Some("https://cdn.example.org/x/abc.png")
        );
        assert!(!snapshot[0].is_pending);
        assert!(!session.store.contains(&pending_id));
    }

    #[test]
    fn empty_text_send_is_not_queued() {
        let mut session = session();
        assert_eq!(session.begin_text_send("   ", 1_000), None);
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn whitespace_text_event_never_reaches_the_snapshot() {
        let mut session = session();
        session.handle_event(
            ChannelEvent::MessageReceived(record("m1", PEER, "   ", 1_000)),
            1_000,
        );
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn history_merge_keeps_in_flight_sends() {
        let mut session = session();
        let queued = session
            .begin_text_send("in flight", 10_000)
            .expect("send should queue");

        session.apply_history(vec![record("m1", PEER, "old", 1_000)], 10_500);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|m| m.id == queued.pending_id));
        assert_eq!(session.history_state(), &HistoryState::Loaded);
    }

    #[test]
    fn apply_history_twice_is_idempotent() {
        let mut session = session();
        let batch = vec![
            record("m1", PEER, "a", 1_000),
            record("m2", SELF, "b", 2_000),
        ];
        session.apply_history(batch.clone(), 5_000);
        let first = session.snapshot();
        session.apply_history(batch, 6_000);
        assert_eq!(session.snapshot(), first);
    }

    #[test]
    fn send_response_and_live_event_race_converges() {
        let mut session = session();
        let queued = session
            .begin_text_send("hi", 10_000)
            .expect("send should queue");

        // Live event arrives before the HTTP response.
        session.handle_event(
            ChannelEvent::MessageReceived(record("m1", SELF, "hi", 10_200)),
            10_200,
        );
        assert!(session.complete_text_send(
            &queued.pending_id,
            Ok(record("m1", SELF, "hi", 10_200)),
            10_600,
        ));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "m1");
    }

    #[test]
    fn failed_text_send_keeps_the_optimistic_entry() {
        let mut session = session();
        let queued = session
            .begin_text_send("hi", 10_000)
            .expect("send should queue");

        let ok = session.complete_text_send(
            &queued.pending_id,
            Err(ClientError::new(
                crate::error::ErrorCategory::Network,
                "timeout",
                "request timed out",
            )),
            11_000,
        );

        assert!(!ok);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_pending);
    }

    #[test]
    fn failed_upload_removes_entry_and_releases_preview() {
        let releases = Arc::new(AtomicUsize::new(0));
        let releases_clone = Arc::clone(&releases);
        let mut session = session();

        let pending_id = session.begin_attachment_send(
            AttachmentKind::Image,
            Some("abc.png".to_owned()),
            PreviewHandle::new(
                "blob:local/abc",
                Box::new(move |_| {
                    releases_clone.fetch_add(1, Ordering::SeqCst);
                }),
            ),
            10_000,
        );

        let outbound = session.complete_attachment_upload(
            &pending_id,
            Err(ClientError::new(
                crate::error::ErrorCategory::Network,
                "upload_failed",
                "connection reset",
            )),
        );

        assert_eq!(outbound, None);
        assert!(session.snapshot().is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn successful_upload_patches_locator_and_emits_send() {
        let mut session = session();
        let pending_id = session.begin_attachment_send(
            AttachmentKind::Pdf,
            Some("report.pdf".to_owned()),
            PreviewHandle::detached(""),
            10_000,
        );

        let outbound = session
            .complete_attachment_upload(
                &pending_id,
                Ok(UploadResponse {
                    locator: "https://cdn.example.org/f/report.pdf".to_owned(),
                    kind: Some("pdf".to_owned()),
                    file_name: Some("report.pdf".to_owned()),
                }),
            )
            .expect("upload success should emit a send event");

        assert!(matches!(
            outbound,
            OutboundEvent::SendMessage {
                kind: MessageKind::Pdf,
                ref attachment_url,
                ..
            } if attachment_url.as_deref() == Some("https://cdn.example.org/f/report.pdf")
        ));
        assert_eq!(
            session.snapshot()[0].body.locator(),
            Some("https://cdn.example.org/f/report.pdf")
        );
    }

    #[test]
    fn empty_self_echo_after_file_send_is_discarded() {
        let mut session = session();
        session.begin_attachment_send(
            AttachmentKind::Image,
            None,
            PreviewHandle::detached("blob:local/abc"),
            10_000,
        );

        session.handle_event(
            ChannelEvent::MessageReceived(record("m1", SELF, "", 12_000)),
            12_000,
        );

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_pending);
    }

    #[test]
    fn text_shadow_of_stored_attachment_is_discarded() {
        let mut session = session();
        session.apply_history(
            vec![image_record(
                "m1",
                PEER,
                "https://cdn.example.org/x/a.png",
                10_000,
            )],
            10_000,
        );

        session.handle_event(
            ChannelEvent::MessageReceived(record(
                "m2",
                PEER,
                "https://cdn.example.org/x/a.png",
                11_000,
            )),
            11_000,
        );

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "m1");
    }

    #[test]
    fn events_for_other_conversations_are_ignored() {
        let mut session = session();
        let mut foreign = record("m1", PEER, "hello", 1_000);
        foreign.conversation_id = Some("c-other".to_owned());

        session.handle_event(ChannelEvent::MessageReceived(foreign), 1_000);
        session.handle_event(
            ChannelEvent::TypingStarted {
                conversation_id: "c-other".to_owned(),
                user_id: PEER.to_owned(),
            },
            1_000,
        );

        assert!(session.snapshot().is_empty());
        assert!(!session.is_typing(1_001));
    }

    #[test]
    fn peer_message_produces_delivery_ack_once() {
        let mut session = session();
        let ack = session.handle_event(
            ChannelEvent::MessageReceived(record("m1", PEER, "hello", 1_000)),
            1_000,
        );
        assert_eq!(
            ack,
            Some(OutboundEvent::DeliveryAcknowledged {
                message_id: "m1".to_owned()
            })
        );

        // Redelivery of the same message must not re-acknowledge.
        let again = session.handle_event(
            ChannelEvent::MessageReceived(record("m1", PEER, "hello", 1_000)),
            1_500,
        );
        assert_eq!(again, None);
    }

    #[test]
    fn own_messages_are_not_acknowledged() {
        let mut session = session();
        let ack = session.handle_event(
            ChannelEvent::MessageReceived(record("m1", SELF, "mine", 1_000)),
            1_000,
        );
        assert_eq!(ack, None);
    }

    #[test]
    fn status_updates_apply_forward_only() {
        let mut session = session();
        session.apply_history(vec![record("m1", SELF, "hello", 1_000)], 1_000);

        session.handle_event(
            ChannelEvent::MessageStatusUpdated {
                message_id: "m1".to_owned(),
                new_state: "seen".to_owned(),
            },
            2_000,
        );
        session.handle_event(
            ChannelEvent::MessageStatusUpdated {
                message_id: "m1".to_owned(),
                new_state: "delivered".to_owned(),
            },
            3_000,
        );

        assert_eq!(session.snapshot()[0].delivery_state, DeliveryState::Seen);
    }

    #[test]
    fn typing_indicator_decays_after_timeout() {
        let mut session = session();
        session.handle_event(
            ChannelEvent::TypingStarted {
                conversation_id: CONV.to_owned(),
                user_id: PEER.to_owned(),
            },
            10_000,
        );

        assert!(session.is_typing(10_500));
        assert!(session.is_typing(12_900));
        assert!(!session.is_typing(13_000));
    }

    #[test]
    fn own_typing_events_do_not_arm_the_indicator() {
        let mut session = session();
        session.handle_event(
            ChannelEvent::TypingStarted {
                conversation_id: CONV.to_owned(),
                user_id: SELF.to_owned(),
            },
            10_000,
        );
        assert!(!session.is_typing(10_001));
    }

    #[test]
    fn presence_push_applies_for_peer_only() {
        let mut session = session();
        session.handle_event(
            ChannelEvent::PresenceChanged {
                user_id: "u-other".to_owned(),
                is_online: true,
                last_seen_ms: None,
            },
            1_000,
        );
        assert_eq!(session.presence(), None);

        session.handle_event(
            ChannelEvent::PresenceChanged {
                user_id: PEER.to_owned(),
                is_online: true,
                last_seen_ms: None,
            },
            1_000,
        );
        assert_eq!(
            session.presence().map(|status| status.is_online),
            Some(true)
        );
        assert!(!session.presence_needs_poll(20_000));
    }

    #[test]
    fn presence_poll_failure_keeps_cached_status() {
        let mut session = session();
        session.apply_presence_poll(
            Ok(RawPresenceRecord {
                is_online: true,
                last_seen_ms: None,
            }),
            1_000,
        );
        session.apply_presence_poll(
            Err(ClientError::new(
                crate::error::ErrorCategory::Network,
                "timeout",
                "request timed out",
            )),
            40_000,
        );
        assert_eq!(
            session.presence().map(|status| status.is_online),
            Some(true)
        );
    }

    #[test]
    fn history_failure_keeps_last_known_good_store() {
        let mut session = session();
        session.apply_history(vec![record("m1", PEER, "hello", 1_000)], 1_000);
        session.history_failed(ClientError::new(
            crate::error::ErrorCategory::Network,
            "timeout",
            "request timed out",
        ));

        assert_eq!(session.snapshot().len(), 1);
        assert!(matches!(session.history_state(), HistoryState::Failed(_)));
    }
}
