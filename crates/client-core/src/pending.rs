use std::fmt;

use tracing::{debug, trace, warn};

use crate::types::{Message, MessageKind, PENDING_ID_PREFIX};

/// Revocation hook invoked when a local preview resource is released.
pub type PreviewRevoker = Box<dyn FnOnce(&str) + Send>;

/// Locally owned preview resource (e.g. an object-URL for an image picked
/// from disk) tied to an optimistic entry.
///
/// The resource is released exactly once: explicitly on reconciliation or
/// send failure, or on drop when the entry is abandoned with its session.
/// The locator is never handed out after release.
pub struct PreviewHandle {
    locator: String,
    revoke: Option<PreviewRevoker>,
}

impl PreviewHandle {
    pub fn new(locator: impl Into<String>, revoke: PreviewRevoker) -> Self {
        Self {
            locator: locator.into(),
            revoke: Some(revoke),
        }
    }

    /// Preview without an underlying resource (PDF sends have no local
    /// preview, only a placeholder locator).
    pub fn detached(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            revoke: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Release the underlying resource.
    fn release(&mut self) {
        if let Some(revoke) = self.revoke.take() {
            trace!(locator = %self.locator, "releasing local preview resource");
            revoke(&self.locator);
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle")
            .field("locator", &self.locator)
            .field("released", &self.revoke.is_none())
            .finish()
    }
}

/// One optimistic send awaiting server confirmation.
#[derive(Debug)]
pub struct PendingEntry {
    /// Locally assigned `pending-send-*` id; doubles as the store identity.
    pub id: String,
    pub sender_id: String,
    pub created_at_ms: u64,
    pub kind: MessageKind,
    /// Current resource locator: the local preview before upload, the
    /// server-returned URL after.
    pub locator: Option<String>,
    preview: Option<PreviewHandle>,
}

impl PendingEntry {
    fn release_preview(&mut self) {
        if let Some(mut preview) = self.preview.take() {
            preview.release();
        }
    }
}

/// Tracks optimistic entries for one conversation and pairs each with its
/// confirmed counterpart exactly once.
#[derive(Debug, Default)]
pub struct PendingTracker {
    next_id: u64,
    entries: Vec<PendingEntry>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pending_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == pending_id)
    }

    /// Allocate the next namespaced pending id.
    pub fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{PENDING_ID_PREFIX}{}", self.next_id)
    }

    /// Start tracking a text send.
    pub fn track_text(&mut self, id: String, sender_id: String, created_at_ms: u64) {
        self.entries.push(PendingEntry {
            id,
            sender_id,
            created_at_ms,
            kind: MessageKind::Text,
            locator: None,
            preview: None,
        });
    }

    /// Start tracking a file send with its local preview.
    pub fn track_attachment(
        &mut self,
        id: String,
        sender_id: String,
        created_at_ms: u64,
        kind: MessageKind,
        preview: PreviewHandle,
    ) {
        self.entries.push(PendingEntry {
            id,
            sender_id,
            created_at_ms,
            kind,
            locator: Some(preview.locator().to_owned()),
            preview: Some(preview),
        });
    }

    /// Patch the entry's locator once the upload returns the server URL.
    pub fn set_locator(&mut self, pending_id: &str, locator: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == pending_id) {
            Some(entry) => {
                entry.locator = Some(locator.into());
                true
            }
            None => {
                warn!(pending_id, "locator update for unknown pending entry");
                false
            }
        }
    }

    /// Remove an entry after successful reconciliation, releasing its preview.
    pub fn extinguish(&mut self, pending_id: &str) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|entry| entry.id == pending_id)?;
        let mut entry = self.entries.remove(index);
        entry.release_preview();
        Some(entry)
    }

    /// Remove an entry after a failed send, releasing its preview.
    pub fn discard(&mut self, pending_id: &str) -> bool {
        match self.extinguish(pending_id) {
            Some(entry) => {
                debug!(pending_id = %entry.id, "discarded failed optimistic entry");
                true
            }
            None => false,
        }
    }

    /// Find, remove, and release the first entry matching a confirmed
    /// message. At most one entry is extinguished per confirmed message.
    pub fn take_match(&mut self, confirmed: &Message, tolerance_ms: u64) -> Option<PendingEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry_matches(entry, confirmed, tolerance_ms))?;
        let mut entry = self.entries.remove(index);
        entry.release_preview();
        Some(entry)
    }

    /// Release every remaining preview. Called on conversation teardown.
    pub fn release_all(&mut self) {
        for entry in &mut self.entries {
            entry.release_preview();
        }
        self.entries.clear();
    }
}

impl Drop for PendingTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Heuristic pairing an optimistic entry with a confirmed message.
///
/// Kept in one place so a client-generated correlation id can replace it if
/// the backend ever starts echoing one. Clauses, first match wins:
/// locator byte-equality, final-path-segment (filename) equality, then
/// same sender and kind within the timestamp tolerance window.
fn entry_matches(entry: &PendingEntry, confirmed: &Message, tolerance_ms: u64) -> bool {
    if let (Some(entry_locator), Some(confirmed_locator)) =
        (entry.locator.as_deref(), confirmed.body.locator())
    {
        if entry_locator == confirmed_locator {
            return true;
        }
        if final_path_segment(entry_locator) == final_path_segment(confirmed_locator) {
            return true;
        }
    }

    entry.sender_id == confirmed.sender_id
        && entry.kind == confirmed.kind()
        && entry.created_at_ms.abs_diff(confirmed.created_at_ms) <= tolerance_ms
}

/// Final path segment of a locator, ignoring query and fragment.
fn final_path_segment(locator: &str) -> &str {
    let without_suffix = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator);
    without_suffix
        .rsplit('/')
        .next()
        .unwrap_or(without_suffix)
}
