//! Frame reader and dispatcher.
//!
//! The dispatcher only reads while it is in the `Reading` state. State
//! changes wake the loop through a watch channel, and a read in flight is
//! abandoned as soon as the state moves away from `Reading`.
//!
//! | State               | Entered from                 | Left on                          |
//! |---------------------|------------------------------|----------------------------------|
//! | Idle                | start                        | begin_reading                    |
//! | Reading             | Idle, WaitingReconnection    | notify_disconnected, stop        |
//! | WaitingReconnection | Reading                      | begin_reading, stop              |
//! | Stopped             | any                          | (terminal)                       |

use crate::connection::PeerObserver;
use crate::error::LinkError;
use crate::event::LinkHandle;
use crate::handler::{Dispatch, HandlerRegistry};
use bytes::BytesMut;
use carto_protocol::{Frame, ProtocolError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Reading,
    WaitingReconnection,
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Idle => write!(f, "idle"),
            DispatcherState::Reading => write!(f, "reading"),
            DispatcherState::WaitingReconnection => write!(f, "waiting_reconnection"),
            DispatcherState::Stopped => write!(f, "stopped"),
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

struct Slot {
    state: DispatcherState,
    reader: Option<BoxedReader>,
    epoch: u64,
}

/// State shared between the dispatcher handle and its loop.
struct Shared {
    slot: Mutex<Slot>,
    state_tx: watch::Sender<DispatcherState>,
}

impl Shared {
    /// Updates the slot and wakes the loop. The wake-up is sent even when
    /// the state value is unchanged, so a new reader is always noticed.
    fn update(&self, f: impl FnOnce(&mut Slot)) {
        let state = {
            let mut slot = self.slot.lock();
            f(&mut slot);
            slot.state
        };
        self.state_tx.send_replace(state);
    }

    fn begin_reading(&self, reader: BoxedReader, epoch: u64) {
        self.update(|slot| {
            if slot.state == DispatcherState::Stopped {
                return;
            }
            slot.state = DispatcherState::Reading;
            slot.reader = Some(reader);
            slot.epoch = epoch;
        });
    }

    fn disconnect(&self, epoch: Option<u64>) {
        self.update(|slot| {
            if epoch.is_some_and(|epoch| epoch != slot.epoch) {
                return;
            }
            slot.reader = None;
            if slot.state == DispatcherState::Reading {
                slot.state = DispatcherState::WaitingReconnection;
            }
        });
    }

    fn stop(&self) {
        self.update(|slot| {
            slot.state = DispatcherState::Stopped;
            slot.reader = None;
        });
    }

    fn is_reading(&self, epoch: u64) -> bool {
        let slot = self.slot.lock();
        slot.state == DispatcherState::Reading && slot.epoch == epoch
    }
}

/// Reads frames from the peer and routes them to registered handlers.
pub struct Dispatcher {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<DispatcherState>,
    registry: Arc<HandlerRegistry>,
    link: Option<LinkHandle>,
    read_buffer_size: usize,
    task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, read_buffer_size: usize) -> Self {
        let (state_tx, state_rx) = watch::channel(DispatcherState::Idle);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: DispatcherState::Idle,
                    reader: None,
                    epoch: 0,
                }),
                state_tx,
            }),
            state_rx,
            registry,
            link: None,
            read_buffer_size,
            task: None,
        }
    }

    /// Reports peer closes to the connection manager behind `link`.
    pub fn with_link(mut self, link: LinkHandle) -> Self {
        self.link = Some(link);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn state(&self) -> DispatcherState {
        *self.state_rx.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state_rx.clone()
    }

    /// Spawns the read loop in `Idle`.
    pub fn start(&mut self) -> Result<(), LinkError> {
        if self.task.is_some() || self.state() == DispatcherState::Stopped {
            return Err(LinkError::AlreadyStarted);
        }

        let run = ReadLoop {
            shared: self.shared.clone(),
            state_rx: self.shared.state_tx.subscribe(),
            registry: self.registry.clone(),
            link: self.link.clone(),
            buffer: BytesMut::with_capacity(self.read_buffer_size),
            read_buffer_size: self.read_buffer_size,
        };
        self.task = Some(tokio::spawn(run.run()));
        Ok(())
    }

    /// Hands over the read half of a new connection and starts reading.
    pub fn begin_reading<R>(&self, reader: R, epoch: u64)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.shared.begin_reading(Box::new(reader), epoch);
    }

    /// Suspends reading until the next `begin_reading`.
    pub fn notify_disconnected(&self) {
        self.shared.disconnect(None);
    }

    /// Moves to `Stopped` and waits for the loop to exit.
    pub async fn stop(&mut self) {
        self.shared.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Dispatcher task failed: {}", e);
            }
        }
    }

    /// Observer to install on the connection manager.
    pub fn observer(&self) -> Arc<dyn PeerObserver> {
        Arc::new(DispatcherObserver {
            shared: self.shared.clone(),
        })
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

struct DispatcherObserver {
    shared: Arc<Shared>,
}

impl PeerObserver for DispatcherObserver {
    fn peer_connected(&self, reader: OwnedReadHalf, epoch: u64) {
        self.shared.begin_reading(Box::new(reader), epoch);
    }

    fn peer_disconnected(&self, epoch: u64) {
        self.shared.disconnect(Some(epoch));
    }
}

/// Why a connection's read loop ended.
enum ReadEnd {
    /// The state left `Reading` for this connection.
    Superseded,
    /// The peer closed or the read failed.
    PeerLost,
}

struct ReadLoop {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<DispatcherState>,
    registry: Arc<HandlerRegistry>,
    link: Option<LinkHandle>,
    buffer: BytesMut,
    read_buffer_size: usize,
}

impl ReadLoop {
    async fn run(mut self) {
        loop {
            self.state_rx.borrow_and_update();

            let (state, reader, epoch) = {
                let mut slot = self.shared.slot.lock();
                let reader = match slot.state {
                    DispatcherState::Reading => slot.reader.take(),
                    _ => None,
                };
                (slot.state, reader, slot.epoch)
            };

            match (state, reader) {
                (DispatcherState::Stopped, _) => break,
                (DispatcherState::Reading, Some(reader)) => {
                    if let ReadEnd::PeerLost = self.read_connection(reader, epoch).await {
                        self.shared.disconnect(Some(epoch));
                        if let Some(link) = &self.link {
                            if let Err(e) = link.notify_disconnected_epoch(epoch).await {
                                tracing::debug!("Could not report disconnect: {}", e);
                            }
                        }
                    }
                }
                _ => {
                    if self.state_rx.changed().await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Dispatcher stopped");
    }

    async fn read_connection(&mut self, mut reader: BoxedReader, epoch: u64) -> ReadEnd {
        tracing::debug!("Reading from connection {}", epoch);
        self.buffer.clear();
        let mut dispatched = 0u64;
        let mut dropped = 0u64;

        let end = loop {
            loop {
                match Frame::decode_from(&mut self.buffer) {
                    Ok(Some(frame)) => {
                        if !self.shared.is_reading(epoch) {
                            break;
                        }
                        self.dispatch(&frame);
                        dispatched += 1;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Dropping malformed frame: {}", e);
                        dropped += 1;
                    }
                }
            }

            if !self.shared.is_reading(epoch) {
                break ReadEnd::Superseded;
            }

            self.buffer.reserve(self.read_buffer_size);
            tokio::select! {
                result = reader.read_buf(&mut self.buffer) => {
                    match result {
                        Ok(0) => {
                            if !self.buffer.is_empty() {
                                let err = truncated(&self.buffer);
                                tracing::warn!("Dropping malformed frame: {}", err);
                                dropped += 1;
                            }
                            tracing::info!("Peer closed connection {}", epoch);
                            break ReadEnd::PeerLost;
                        }
                        Ok(n) => tracing::trace!("Read {} bytes", n),
                        Err(e) => {
                            let err = LinkError::Transport(e);
                            tracing::warn!("Read failed on connection {}: {}", epoch, err);
                            break ReadEnd::PeerLost;
                        }
                    }
                }
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break ReadEnd::Superseded;
                    }
                }
            }
        };

        tracing::debug!(
            "Connection {} done: {} frames dispatched, {} dropped",
            epoch,
            dispatched,
            dropped
        );
        end
    }

    fn dispatch(&self, frame: &Frame) {
        match self.registry.dispatch(frame) {
            Dispatch::Handled => {}
            Dispatch::Unhandled(msg_type) => {
                tracing::debug!("No handler for {}", msg_type)
            }
            Dispatch::Unknown(raw) => tracing::debug!("Ignoring unknown message type {:#06x}", raw),
        }
    }
}

/// Error describing the incomplete frame left when the peer closed.
fn truncated(buffer: &[u8]) -> ProtocolError {
    Frame::decode(buffer)
        .err()
        .unwrap_or(ProtocolError::IncompleteLengthPrefix {
            available: buffer.len(),
        })
}
