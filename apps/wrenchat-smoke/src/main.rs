//! Headless smoke harness: wires the reconciliation engine to an in-process
//! scripted backend and runs one conversation end to end.

mod config;
mod logging;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use client_core::{
    ChannelEvent, ClientError, RawMessageRecord, RawPresenceRecord, RawSenderRecord,
    UploadResponse,
};
use client_gateway::{ChatApi, ConnectionManager, GatewayConfig, SessionDriver, SnapshotCallback};
use client_platform::{CredentialStore, InMemoryCredentialStore};
use config::SmokeConfig;
use tracing::{error, info};

const CREDENTIAL_REALM: &str = "wrenchat";

/// In-process backend stand-in with deterministic responses.
struct ScriptedApi {
    self_user_id: String,
    peer_user_id: String,
    next_server_id: AtomicU64,
}

impl ScriptedApi {
    fn new(config: &SmokeConfig) -> Self {
        Self {
            self_user_id: config.self_user_id.clone(),
            peer_user_id: config.peer_user_id.clone(),
            next_server_id: AtomicU64::new(1),
        }
    }

    fn allocate_server_id(&self) -> String {
        format!("srv-{}", self.next_server_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl ChatApi for ScriptedApi {
    async fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<RawMessageRecord>, ClientError> {
        Ok(vec![
            RawMessageRecord {
                message_id: Some(self.allocate_server_id()),
                conversation_id: Some(conversation_id.to_owned()),
                sender: Some(RawSenderRecord {
                    id: Some(self.peer_user_id.clone()),
                }),
                content: Some("welcome to the smoke run".to_owned()),
                created_at_ms: Some(now_millis().saturating_sub(60_000)),
                ..RawMessageRecord::default()
            },
            RawMessageRecord {
                message_id: Some(self.allocate_server_id()),
                conversation_id: Some(conversation_id.to_owned()),
                sender_id: Some(self.peer_user_id.clone()),
                kind: Some("image".to_owned()),
                attachment_url: Some("https://cdn.example.org/smoke/sunset.png".to_owned()),
                file_name: Some("sunset.png".to_owned()),
                created_at_ms: Some(now_millis().saturating_sub(30_000)),
                ..RawMessageRecord::default()
            },
        ])
    }

    async fn send_text(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<RawMessageRecord, ClientError> {
        Ok(RawMessageRecord {
            message_id: Some(self.allocate_server_id()),
            conversation_id: Some(conversation_id.to_owned()),
            sender_id: Some(self.self_user_id.clone()),
            content: Some(content.to_owned()),
            created_at_ms: Some(now_millis()),
            delivery_state: Some("sent".to_owned()),
            ..RawMessageRecord::default()
        })
    }

    async fn upload_attachment(
        &self,
        _conversation_id: &str,
        _receiver_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ClientError> {
        info!(file_name, size = bytes.len(), "scripted upload accepted");
        Ok(UploadResponse {
            locator: format!("https://cdn.example.org/smoke/{file_name}"),
            kind: None,
            file_name: Some(file_name.to_owned()),
        })
    }

    async fn fetch_presence(&self, user_id: &str) -> Result<RawPresenceRecord, ClientError> {
        info!(user_id, "scripted presence poll");
        Ok(RawPresenceRecord {
            is_online: true,
            last_seen_ms: Some(now_millis()),
        })
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    info!("starting wrenchat-smoke");

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let gateway_config = match GatewayConfig::new(&config.server_url) {
        Ok(gateway_config) => gateway_config.with_engine(config.engine),
        Err(err) => {
            eprintln!("Invalid server URL: {err}");
            std::process::exit(1);
        }
    };

    let credentials = InMemoryCredentialStore::default();
    if let Err(err) = credentials.store_token(CREDENTIAL_REALM, &config.self_user_id, "smoke-token")
    {
        eprintln!("Failed to seed credential store: {err}");
        std::process::exit(1);
    }

    let manager = ConnectionManager::new(credentials, CREDENTIAL_REALM, gateway_config);
    let (handle, mut outbound_rx) = match manager.connect(&config.self_user_id) {
        Ok(connected) => connected,
        Err(err) => {
            eprintln!("Failed to connect: {err}");
            std::process::exit(1);
        }
    };

    // Transport stand-in: everything the engine wants on the wire gets logged.
    tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            info!(?event, "outbound channel event");
        }
    });

    let api = Arc::new(ScriptedApi::new(&config));
    let on_snapshot: SnapshotCallback = Arc::new(|snapshot| {
        info!(messages = snapshot.len(), "snapshot updated");
    });

    let driver = SessionDriver::spawn(
        Arc::clone(&api),
        &handle,
        config.conversation_id.clone(),
        config.self_user_id.clone(),
        config.peer_user_id.clone(),
        config.engine,
        on_snapshot,
    );

    tokio::time::sleep(Duration::from_millis(200)).await;

    if !driver.send_text("hello from the smoke harness") {
        error!("text send was not queued");
    }

    handle.channels().emit(ChannelEvent::TypingStarted {
        conversation_id: config.conversation_id.clone(),
        user_id: config.peer_user_id.clone(),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(is_typing = driver.is_typing(), "peer typing state");

    handle
        .channels()
        .emit(ChannelEvent::MessageReceived(RawMessageRecord {
            message_id: Some("srv-live-1".to_owned()),
            conversation_id: Some(config.conversation_id.clone()),
            sender_id: Some(config.peer_user_id.clone()),
            content: Some("and hello back".to_owned()),
            created_at_ms: Some(now_millis()),
            ..RawMessageRecord::default()
        }));
    handle.channels().emit(ChannelEvent::MessageStatusUpdated {
        message_id: "srv-live-1".to_owned(),
        new_state: "seen".to_owned(),
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    let summary = driver.conversation_summary();
    info!(
        conversation_id = %summary.conversation_id,
        last_message = summary.last_message_preview.as_deref().unwrap_or("<none>"),
        "final conversation summary"
    );
    for message in driver.snapshot() {
        info!(
            id = %message.id,
            sender = %message.sender_id,
            pending = message.is_pending,
            state = ?message.delivery_state,
            preview = %message.preview_text(),
            "message"
        );
    }

    driver.shutdown();
    manager.disconnect(handle);
    info!("smoke run complete");
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
