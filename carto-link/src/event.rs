//! Command queue events and the producer handle.

use crate::error::LinkError;
use bytes::Bytes;
use carto_protocol::{Frame, Message};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Event consumed by the connection manager loop.
///
/// `Connected` and `PollConnection` are only ever produced by the loop
/// itself; producers outside the loop go through [`LinkHandle`].
#[derive(Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peer socket is ready to be installed.
    Connected,
    /// An encoded frame to write to the peer.
    WriteRequest(Bytes),
    /// The connection identified by `epoch` is gone.
    Disconnected { epoch: u64 },
    /// Try one bounded accept/connect.
    PollConnection,
    /// Shut the loop down.
    Stop,
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Connected => "connected",
            LinkEvent::WriteRequest(_) => "write_request",
            LinkEvent::Disconnected { .. } => "disconnected",
            LinkEvent::PollConnection => "poll_connection",
            LinkEvent::Stop => "stop",
        }
    }
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::WriteRequest(bytes) => write!(f, "WriteRequest({} bytes)", bytes.len()),
            LinkEvent::Disconnected { epoch } => write!(f, "Disconnected(epoch {})", epoch),
            other => f.write_str(other.name()),
        }
    }
}

/// Cloneable producer side of the command queue.
///
/// Every method is safe to call from any task or thread. Writes are only
/// transmitted while a peer is connected; frames queued while disconnected
/// are discarded by the manager.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<LinkEvent>,
    epoch: Arc<AtomicU64>,
}

impl LinkHandle {
    pub(crate) fn new(tx: mpsc::Sender<LinkEvent>, epoch: Arc<AtomicU64>) -> Self {
        Self { tx, epoch }
    }

    /// Queues already-encoded frame bytes without waiting.
    pub fn send(&self, bytes: impl Into<Bytes>) -> Result<(), LinkError> {
        self.try_enqueue(LinkEvent::WriteRequest(bytes.into()))
    }

    /// Queues already-encoded frame bytes, waiting for queue capacity.
    pub async fn send_async(&self, bytes: impl Into<Bytes>) -> Result<(), LinkError> {
        self.tx
            .send(LinkEvent::WriteRequest(bytes.into()))
            .await
            .map_err(|_| LinkError::QueueClosed)
    }

    /// Encodes and queues a frame without waiting.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), LinkError> {
        let bytes = frame.encode()?;
        self.send(bytes.freeze())
    }

    /// Encodes and queues a typed message without waiting.
    pub fn send_message(&self, message: &Message) -> Result<(), LinkError> {
        let bytes = message.encode()?;
        self.send(bytes.freeze())
    }

    /// Encodes and queues a typed message, waiting for queue capacity.
    pub async fn send_message_async(&self, message: &Message) -> Result<(), LinkError> {
        let bytes = message.encode()?;
        self.send_async(bytes.freeze()).await
    }

    /// Reports that the current connection is gone.
    pub fn notify_disconnected(&self) -> Result<(), LinkError> {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.try_enqueue(LinkEvent::Disconnected { epoch })
    }

    /// Reports that the connection `epoch` is gone, waiting for capacity.
    pub(crate) async fn notify_disconnected_epoch(&self, epoch: u64) -> Result<(), LinkError> {
        self.tx
            .send(LinkEvent::Disconnected { epoch })
            .await
            .map_err(|_| LinkError::QueueClosed)
    }

    /// Asks the loop to terminate. A closed queue means it already has.
    pub(crate) async fn request_stop(&self) {
        let _ = self.tx.send(LinkEvent::Stop).await;
    }

    /// Epoch of the most recently installed connection (0 before the first).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns whether the manager loop has released the queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn try_enqueue(&self, event: LinkEvent) -> Result<(), LinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => LinkError::QueueFull,
            TrySendError::Closed(_) => LinkError::QueueClosed,
        })
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("epoch", &self.epoch())
            .field("closed", &self.is_closed())
            .finish()
    }
}
