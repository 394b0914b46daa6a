use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ChannelEvent, OutboundEvent};

/// Broadcast stream of inbound push events.
pub type InboundStream = broadcast::Receiver<ChannelEvent>;

/// Errors returned by event channel operations.
#[derive(Debug, Error)]
pub enum EventChannelError {
    /// The outbound receiver side is closed.
    #[error("outbound event channel is closed")]
    OutboundChannelClosed,
}

/// Channel pair carrying the live-event traffic of one connection: outbound
/// events to the transport, inbound push events fanned out to subscribers.
#[derive(Clone, Debug)]
pub struct EventChannels {
    outbound_tx: mpsc::Sender<OutboundEvent>,
    inbound_tx: broadcast::Sender<ChannelEvent>,
}

impl EventChannels {
    /// Create a new channel set and return it with the outbound receiver the
    /// transport drains.
    pub fn new(
        outbound_buffer: usize,
        inbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        let (inbound_tx, _) = broadcast::channel(inbound_buffer.max(1));

        (
            Self {
                outbound_tx,
                inbound_tx,
            },
            outbound_rx,
        )
    }

    /// Clone the outbound sender.
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundEvent> {
        self.outbound_tx.clone()
    }

    /// Clone the inbound sender the transport publishes into.
    pub fn inbound_sender(&self) -> broadcast::Sender<ChannelEvent> {
        self.inbound_tx.clone()
    }

    /// Subscribe to inbound push events.
    pub fn subscribe(&self) -> InboundStream {
        self.inbound_tx.subscribe()
    }

    /// Queue one outbound event for the transport.
    pub async fn publish(&self, event: OutboundEvent) -> Result<(), EventChannelError> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| EventChannelError::OutboundChannelClosed)
    }

    /// Fan an inbound event out to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.inbound_tx.send(event);
    }
}

/// Receive the next inbound event, skipping over lagged gaps.
///
/// Returns `Err(())` once the channel is closed.
pub async fn next_event(events: &mut InboundStream) -> Result<ChannelEvent, ()> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(()),
        }
    }
}
