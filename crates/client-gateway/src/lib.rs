//! Backend boundary for the WrenChat client: connection lifecycle for the
//! live event channel and the task that drives one conversation session.
//!
//! The REST surface is abstracted behind [`ChatApi`]; concrete transports
//! live outside this crate. The gateway owns what must outlive a single
//! request: the event channel pair, the per-conversation driver tasks, and
//! their cancellation scopes.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use client_core::{
    AttachmentKind, ClientError, ConversationSession, ConversationSummary, EngineConfig,
    ErrorCategory, EventChannels, HistoryState, InboundStream, Message, OutboundEvent,
    PresenceStatus, PreviewHandle, RawMessageRecord, RawPresenceRecord, RetryPolicy,
    UploadResponse, next_event,
};
use client_platform::{CredentialError, CredentialStore, RealmCredentialStore};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

const DEFAULT_OUTBOUND_BUFFER: usize = 64;
const DEFAULT_INBOUND_BUFFER: usize = 256;

/// REST surface consumed by the engine. Implementations are external; tests
/// and the smoke harness provide in-process fakes.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch the full message history of a conversation.
    fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<RawMessageRecord>, ClientError>> + Send;

    /// Send a text message; the response mirrors the sent content with the
    /// server-assigned id.
    fn send_text(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<RawMessageRecord, ClientError>> + Send;

    /// Upload a file for a conversation. Transport details are opaque.
    fn upload_attachment(
        &self,
        conversation_id: &str,
        receiver_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<UploadResponse, ClientError>> + Send;

    /// Fetch online/last-seen status for a user.
    fn fetch_presence(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<RawPresenceRecord, ClientError>> + Send;
}

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Normalized base URL of the backend.
    pub base_url: String,
    pub outbound_buffer: usize,
    pub inbound_buffer: usize,
    /// Engine tuning forwarded to each conversation session.
    pub engine: EngineConfig,
}

impl GatewayConfig {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            inbound_buffer: DEFAULT_INBOUND_BUFFER,
            engine: EngineConfig::default(),
        })
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

/// Normalize a user-supplied server URL: upgrade http, require https with a
/// host, strip the trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ClientError::new(
            ErrorCategory::Config,
            "server_url_required",
            "server URL is required",
        ));
    }

    let candidate = if let Some(rest) = raw.strip_prefix("http://") {
        format!("https://{}", rest.trim())
    } else if raw.starts_with("https://") {
        raw.to_owned()
    } else if raw.contains("://") {
        return Err(ClientError::new(
            ErrorCategory::Config,
            "server_url_insecure",
            "only https server URLs are supported",
        ));
    } else {
        format!("https://{raw}")
    };

    let parsed = Url::parse(&candidate).map_err(|err| {
        ClientError::new(
            ErrorCategory::Config,
            "server_url_invalid",
            format!("invalid server URL: {err}"),
        )
    })?;
    if parsed.host_str().is_none() {
        return Err(ClientError::new(
            ErrorCategory::Config,
            "server_url_invalid",
            "server URL must include a host",
        ));
    }

    Ok(parsed.as_str().trim_end_matches('/').to_owned())
}

/// Live-channel connection with explicit lifecycle.
///
/// `connect` resolves the account credential up front and fails fast when
/// none is stored; no network activity is attempted in that case.
pub struct ConnectionManager<S: CredentialStore> {
    credentials: RealmCredentialStore<S>,
    config: GatewayConfig,
    next_connection_id: AtomicU64,
}

/// Handle to one established connection. Dropping the handle does not tear
/// the connection down; call [`ConnectionManager::disconnect`].
pub struct ConnectionHandle {
    connection_id: u64,
    account: String,
    token: String,
    channels: EventChannels,
    cancel: CancellationToken,
}

impl<S: CredentialStore> ConnectionManager<S> {
    pub fn new(store: S, realm: impl Into<String>, config: GatewayConfig) -> Self {
        Self {
            credentials: RealmCredentialStore::new(store, realm),
            config,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open the live event channel for an account.
    ///
    /// Returns the handle plus the outbound receiver the transport drains.
    pub fn connect(
        &self,
        account: &str,
    ) -> Result<(ConnectionHandle, mpsc::Receiver<OutboundEvent>), ClientError> {
        let token = self.credentials.token(account).map_err(|err| match err {
            CredentialError::Missing => ClientError::auth_missing(),
            other => ClientError::new(
                ErrorCategory::Internal,
                "credential_store_failure",
                other.to_string(),
            ),
        })?;

        let (channels, outbound_rx) =
            EventChannels::new(self.config.outbound_buffer, self.config.inbound_buffer);
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        info!(account, connection_id, "live event channel connected");

        Ok((
            ConnectionHandle {
                connection_id,
                account: account.to_owned(),
                token,
                channels,
                cancel: CancellationToken::new(),
            },
            outbound_rx,
        ))
    }

    /// Tear a connection down, cancelling every task scoped to it.
    pub fn disconnect(&self, handle: ConnectionHandle) {
        info!(
            account = %handle.account,
            connection_id = handle.connection_id,
            "disconnecting live event channel"
        );
        handle.cancel.cancel();
    }
}

impl ConnectionHandle {
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Bearer token the transport attaches to requests.
    pub fn bearer_token(&self) -> &str {
        &self.token
    }

    pub fn channels(&self) -> &EventChannels {
        &self.channels
    }

    pub fn subscribe(&self) -> InboundStream {
        self.channels.subscribe()
    }

    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundEvent> {
        self.channels.outbound_sender()
    }

    /// Child cancellation scope for per-conversation tasks; dies with the
    /// connection, and can be cancelled independently on conversation switch.
    pub fn conversation_scope(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Callback publishing fresh message snapshots to the UI layer.
pub type SnapshotCallback = Arc<dyn Fn(Vec<Message>) + Send + Sync + 'static>;

/// Task bundle driving one open conversation.
///
/// Spawns the history fetch (with retry), the inbound event pump, and the
/// presence poll backstop. Switching conversations means shutting this driver
/// down and spawning a new one; every task select!s on the driver's
/// cancellation scope, so nothing from the old conversation outlives the
/// switch.
pub struct SessionDriver<A: ChatApi> {
    api: Arc<A>,
    session: Arc<Mutex<ConversationSession>>,
    conversation_id: String,
    peer_id: String,
    outbound_tx: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
    on_snapshot: SnapshotCallback,
    history_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
    presence_task: JoinHandle<()>,
}

impl<A: ChatApi> SessionDriver<A> {
    /// Start driving a conversation over an established connection.
    pub fn spawn(
        api: Arc<A>,
        handle: &ConnectionHandle,
        conversation_id: impl Into<String>,
        self_user_id: impl Into<String>,
        peer_id: impl Into<String>,
        engine: EngineConfig,
        on_snapshot: SnapshotCallback,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let peer_id = peer_id.into();
        let cancel = handle.conversation_scope();
        let session = Arc::new(Mutex::new(ConversationSession::new(
            conversation_id.clone(),
            self_user_id.into(),
            peer_id.clone(),
            engine,
        )));
        let outbound_tx = handle.outbound_sender();

        debug!(%conversation_id, "spawning session driver");

        let history_task = spawn_history_task(
            Arc::clone(&api),
            Arc::clone(&session),
            conversation_id.clone(),
            cancel.clone(),
            Arc::clone(&on_snapshot),
        );
        let event_task = spawn_event_task(
            Arc::clone(&session),
            handle.subscribe(),
            outbound_tx.clone(),
            cancel.clone(),
            Arc::clone(&on_snapshot),
        );
        let presence_task = spawn_presence_task(
            Arc::clone(&api),
            Arc::clone(&session),
            peer_id.clone(),
            engine.presence_poll_interval_ms,
            cancel.clone(),
        );

        Self {
            api,
            session,
            conversation_id,
            peer_id,
            outbound_tx,
            cancel,
            on_snapshot,
            history_task,
            event_task,
            presence_task,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Queue an optimistic text send.
    ///
    /// The entry shows up in the next snapshot immediately; the request runs
    /// in the background and resolves through the session. Returns `false`
    /// when nothing was sent (empty input or a closed channel).
    pub fn send_text(&self, body: &str) -> bool {
        let queued = {
            let mut session = lock_session(&self.session);
            session.begin_text_send(body, now_millis())
        };
        let Some(queued) = queued else {
            return false;
        };
        self.publish_snapshot();

        if self.outbound_tx.try_send(queued.outbound.clone()).is_err() {
            warn!("outbound channel full or closed; dropping send event");
        }

        let api = Arc::clone(&self.api);
        let session = Arc::clone(&self.session);
        let conversation_id = self.conversation_id.clone();
        let body = body.trim().to_owned();
        let pending_id = queued.pending_id;
        let on_snapshot = Arc::clone(&self.on_snapshot);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = api.send_text(&conversation_id, &body) => result,
            };
            let ok = {
                let mut session = lock_session(&session);
                session.complete_text_send(&pending_id, result, now_millis())
            };
            if !ok {
                warn!(%pending_id, "text send failed");
            }
            publish(&session, &on_snapshot);
        });
        true
    }

    /// Queue an optimistic file send: preview first, then the upload.
    pub fn send_attachment(
        &self,
        kind: AttachmentKind,
        file_name: Option<String>,
        bytes: Vec<u8>,
        preview: PreviewHandle,
    ) {
        let pending_id = {
            let mut session = lock_session(&self.session);
            session.begin_attachment_send(kind, file_name.clone(), preview, now_millis())
        };
        self.publish_snapshot();

        let api = Arc::clone(&self.api);
        let session = Arc::clone(&self.session);
        let conversation_id = self.conversation_id.clone();
        let peer_id = self.peer_id.clone();
        let outbound_tx = self.outbound_tx.clone();
        let on_snapshot = Arc::clone(&self.on_snapshot);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let upload_name = file_name.unwrap_or_default();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = api.upload_attachment(&conversation_id, &peer_id, &upload_name, bytes) => result,
            };
            let outbound = {
                let mut session = lock_session(&session);
                session.complete_attachment_upload(&pending_id, result)
            };
            if let Some(event) = outbound {
                if outbound_tx.send(event).await.is_err() {
                    error!("outbound channel closed while announcing upload");
                }
            }
            publish(&session, &on_snapshot);
        });
    }

    /// Publish a local typing transition onto the channel.
    pub fn notify_typing(&self, started: bool) {
        let event = {
            let session = lock_session(&self.session);
            if started {
                session.local_typing_started()
            } else {
                session.local_typing_stopped()
            }
        };
        if self.outbound_tx.try_send(event).is_err() {
            trace!("outbound channel full; dropping typing event");
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        lock_session(&self.session).snapshot()
    }

    pub fn history_state(&self) -> HistoryState {
        lock_session(&self.session).history_state().clone()
    }

    pub fn is_typing(&self) -> bool {
        lock_session(&self.session).is_typing(now_millis())
    }

    pub fn presence(&self) -> Option<PresenceStatus> {
        lock_session(&self.session).presence()
    }

    pub fn conversation_summary(&self) -> ConversationSummary {
        lock_session(&self.session).conversation_summary()
    }

    /// Stop every task belonging to this conversation.
    pub fn shutdown(&self) {
        debug!(conversation_id = %self.conversation_id, "shutting down session driver");
        self.cancel.cancel();
    }

    fn publish_snapshot(&self) {
        publish(&self.session, &self.on_snapshot);
    }
}

impl<A: ChatApi> Drop for SessionDriver<A> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.history_task.abort();
        self.event_task.abort();
        self.presence_task.abort();
    }
}

fn spawn_history_task<A: ChatApi>(
    api: Arc<A>,
    session: Arc<Mutex<ConversationSession>>,
    conversation_id: String,
    cancel: CancellationToken,
    on_snapshot: SnapshotCallback,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let retry = RetryPolicy::default();
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = api.fetch_history(&conversation_id) => result,
            };
            match result {
                Ok(records) => {
                    {
                        let mut session = lock_session(&session);
                        session.apply_history(records, now_millis());
                    }
                    publish(&session, &on_snapshot);
                    break;
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    let delay = retry.delay_for_attempt(attempt, error.retry_after_ms);
                    attempt = attempt.saturating_add(1);
                    {
                        let mut session = lock_session(&session);
                        session.history_failed(error);
                    }
                    publish(&session, &on_snapshot);
                    if !retryable {
                        break;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        trace!(%conversation_id, "history task exiting");
    })
}

fn spawn_event_task(
    session: Arc<Mutex<ConversationSession>>,
    mut events: InboundStream,
    outbound_tx: mpsc::Sender<OutboundEvent>,
    cancel: CancellationToken,
    on_snapshot: SnapshotCallback,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = next_event(&mut events) => match received {
                    Ok(event) => event,
                    Err(()) => {
                        warn!("inbound event stream closed");
                        break;
                    }
                },
            };
            let reaction = {
                let mut session = lock_session(&session);
                session.handle_event(event, now_millis())
            };
            if let Some(outbound) = reaction {
                if outbound_tx.send(outbound).await.is_err() {
                    warn!("outbound channel closed; dropping reaction event");
                }
            }
            publish(&session, &on_snapshot);
        }
    })
}

fn spawn_presence_task<A: ChatApi>(
    api: Arc<A>,
    session: Arc<Mutex<ConversationSession>>,
    peer_id: String,
    poll_interval_ms: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(poll_interval_ms.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let stale = lock_session(&session).presence_needs_poll(now_millis());
            if !stale {
                continue;
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = api.fetch_presence(&peer_id) => result,
            };
            let mut session = lock_session(&session);
            session.apply_presence_poll(result, now_millis());
        }
        trace!(%peer_id, "presence task exiting");
    })
}

fn publish(session: &Arc<Mutex<ConversationSession>>, on_snapshot: &SnapshotCallback) {
    let snapshot = lock_session(session).snapshot();
    on_snapshot(snapshot);
}

fn lock_session(session: &Arc<Mutex<ConversationSession>>) -> MutexGuard<'_, ConversationSession> {
    session
        .lock()
        .expect("conversation session lock poisoned")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
