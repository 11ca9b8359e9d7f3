//! # carto-link
//!
//! Persistent TCP link between the robot controller and the operator console.
//!
//! This crate provides:
//! - A connection manager that listens or connects, serializes writes
//!   through a bounded command queue and recovers from disconnections
//! - A frame dispatcher that reads only while a peer is connected and routes
//!   decoded frames to handlers by message type
//! - An endpoint tying both together for either role

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod handler;

pub use config::{LinkConfig, Role};
pub use connection::{ConnectionManager, ConnectionState, PeerObserver};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use endpoint::Endpoint;
pub use error::LinkError;
pub use event::{LinkEvent, LinkHandle};
pub use handler::{Dispatch, Handler, HandlerRegistry};
