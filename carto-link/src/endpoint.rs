//! One side of the link: connection manager, dispatcher and handlers.

use crate::config::LinkConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{Dispatcher, DispatcherState};
use crate::error::LinkError;
use crate::event::LinkHandle;
use crate::handler::HandlerRegistry;
use bytes::Bytes;
use carto_protocol::{Frame, Message, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A robot controller or operator console endpoint.
///
/// ```no_run
/// # async fn run() -> Result<(), carto_link::LinkError> {
/// use carto_link::{Endpoint, LinkConfig};
/// use carto_protocol::{Message, MessageType};
///
/// let mut endpoint = Endpoint::new(LinkConfig::default());
/// let link = endpoint.handle();
/// endpoint.register_message_handler(MessageType::SendRobotPosition, move |_| {
///     let _ = link.send_message(&Message::RobotPositionReceived);
/// });
/// endpoint.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Endpoint {
    config: LinkConfig,
    registry: Arc<HandlerRegistry>,
    manager: ConnectionManager,
    dispatcher: Dispatcher,
}

impl Endpoint {
    pub fn new(config: LinkConfig) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let manager = ConnectionManager::new(config.clone());
        let dispatcher =
            Dispatcher::new(registry.clone(), config.read_buffer_size).with_link(manager.handle());

        Self {
            config,
            registry,
            manager,
            dispatcher,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Producer handle for outbound frames.
    pub fn handle(&self) -> LinkHandle {
        self.manager.handle()
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    /// Registers a raw payload handler for `msg_type`.
    pub fn register_handler<F>(&self, msg_type: MessageType, handler: F) -> bool
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.registry.register(msg_type, handler)
    }

    /// Registers a handler that receives the decoded message.
    pub fn register_message_handler<F>(&self, msg_type: MessageType, handler: F) -> bool
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.registry.register_message(msg_type, handler)
    }

    /// Starts the dispatcher, then binds or begins connecting.
    pub async fn start(&mut self) -> Result<(), LinkError> {
        self.dispatcher.start()?;
        if let Err(e) = self.manager.start(self.dispatcher.observer()).await {
            self.dispatcher.stop().await;
            return Err(e);
        }

        match self.manager.local_addr() {
            Some(addr) => tracing::info!("Link started as {} on {}", self.config.role, addr),
            None => tracing::info!(
                "Link started as {} towards {}",
                self.config.role,
                self.config.addr
            ),
        }
        Ok(())
    }

    /// Bound address (server role).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.manager.local_addr()
    }

    pub fn send(&self, bytes: impl Into<Bytes>) -> Result<(), LinkError> {
        self.manager.handle().send(bytes)
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<(), LinkError> {
        self.manager.handle().send_frame(frame)
    }

    pub fn send_message(&self, message: &Message) -> Result<(), LinkError> {
        self.manager.handle().send_message(message)
    }

    pub async fn send_message_async(&self, message: &Message) -> Result<(), LinkError> {
        self.manager.handle().send_message_async(message).await
    }

    /// Drops the current connection and goes back to waiting for a peer.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        self.manager.handle().notify_disconnected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    pub fn subscribe_dispatcher(&self) -> watch::Receiver<DispatcherState> {
        self.dispatcher.subscribe()
    }

    /// Waits until a peer is connected.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), LinkError> {
        if !self.manager.is_running() {
            return Err(LinkError::NotStarted);
        }

        let mut states = self.manager.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            states.wait_for(|state| *state != ConnectionState::AwaitingConnection),
        )
        .await
        .map_err(|_| LinkError::Timeout)?
        .map(|state| *state);

        match reached {
            Ok(ConnectionState::Connected) => Ok(()),
            _ => Err(LinkError::QueueClosed),
        }
    }

    /// Stops reading, then stops the manager and releases the socket.
    pub async fn stop(&mut self) {
        self.dispatcher.stop().await;
        self.manager.stop().await;
        tracing::info!("Link stopped");
    }
}
