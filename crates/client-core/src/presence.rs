use tracing::trace;

use crate::types::PresenceStatus;

/// Typing indicator for the other participant of the open conversation.
///
/// Driven by typing events and an injected clock; the indicator decays
/// `timeout_ms` after the most recent typing event unless an explicit stop
/// arrives first. Every new typing event resets the deadline.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    timeout_ms: u64,
    deadline_ms: Option<u64>,
}

impl TypingTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: timeout_ms.max(1),
            deadline_ms: None,
        }
    }

    /// Record a typing event, arming (or re-arming) the decay deadline.
    pub fn on_typing_started(&mut self, now_ms: u64) {
        self.deadline_ms = Some(now_ms.saturating_add(self.timeout_ms));
    }

    /// Record an explicit stop-typing event.
    pub fn on_typing_stopped(&mut self) {
        self.deadline_ms = None;
    }

    pub fn is_typing(&self, now_ms: u64) -> bool {
        self.deadline_ms.is_some_and(|deadline| now_ms < deadline)
    }

    /// Deadline for the next automatic decay, for schedulers that want to
    /// wake exactly when the indicator expires.
    pub fn decay_deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Drop any armed deadline. Called on conversation switch/teardown.
    pub fn clear(&mut self) {
        self.deadline_ms = None;
    }
}

/// Cached online/last-seen state for one user, refreshed by push events with
/// a fixed-interval poll as a correctness backstop.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    poll_interval_ms: u64,
    status: Option<PresenceStatus>,
    last_refreshed_ms: Option<u64>,
}

impl PresenceTracker {
    pub fn new(poll_interval_ms: u64) -> Self {
        Self {
            poll_interval_ms: poll_interval_ms.max(1),
            status: None,
            last_refreshed_ms: None,
        }
    }

    pub fn status(&self) -> Option<PresenceStatus> {
        self.status
    }

    /// Apply a push update. Resets poll staleness but does not stop polling.
    pub fn apply_push(&mut self, status: PresenceStatus, now_ms: u64) {
        trace!(is_online = status.is_online, "presence push applied");
        self.status = Some(status);
        self.last_refreshed_ms = Some(now_ms);
    }

    /// Apply a poll response.
    pub fn apply_poll(&mut self, status: PresenceStatus, now_ms: u64) {
        self.status = Some(status);
        self.last_refreshed_ms = Some(now_ms);
    }

    /// Whether the cached state is stale enough to warrant a poll.
    pub fn needs_poll(&self, now_ms: u64) -> bool {
        match self.last_refreshed_ms {
            None => true,
            Some(refreshed) => now_ms.saturating_sub(refreshed) >= self.poll_interval_ms,
        }
    }
}
