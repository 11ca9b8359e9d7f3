//! Message handler registry.

use carto_protocol::{Frame, Message, MessageType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with the raw payload of a frame.
pub type Handler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Outcome of routing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// Known type, but nothing is registered for it.
    Unhandled(MessageType),
    /// Type outside the catalogue.
    Unknown(u16),
}

/// Maps message types to handlers.
///
/// Handlers run on the dispatcher task, one frame at a time, in arrival
/// order. They should hand long work off to another task.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageType, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw payload handler. Returns `true` if it replaced one.
    pub fn register<F>(&self, msg_type: MessageType, handler: F) -> bool
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(msg_type, Arc::new(handler))
            .is_some()
    }

    /// Registers a handler that receives the decoded message.
    ///
    /// Payloads that do not decode for `msg_type` are logged and dropped.
    pub fn register_message<F>(&self, msg_type: MessageType, handler: F) -> bool
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.register(msg_type, move |payload| {
            match Message::from_payload(msg_type, payload) {
                Ok(message) => handler(message),
                Err(e) => tracing::warn!("Dropping {} frame: {}", msg_type, e),
            }
        })
    }

    pub fn unregister(&self, msg_type: MessageType) -> bool {
        self.handlers.write().remove(&msg_type).is_some()
    }

    pub fn contains(&self, msg_type: MessageType) -> bool {
        self.handlers.read().contains_key(&msg_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Routes a frame to its handler.
    ///
    /// The lock is released before the handler runs, so handlers may
    /// register or unregister other handlers.
    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let Some(msg_type) = frame.message_type() else {
            return Dispatch::Unknown(frame.msg_type);
        };

        let handler = self.handlers.read().get(&msg_type).cloned();
        match handler {
            Some(handler) => {
                handler(&frame.payload);
                Dispatch::Handled
            }
            None => Dispatch::Unhandled(msg_type),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<MessageType> = self.handlers.read().keys().copied().collect();
        types.sort_by_key(|t| t.as_u16());
        f.debug_struct("HandlerRegistry")
            .field("types", &types)
            .finish()
    }
}
