//! Push-channel client for mcp-pm viewers.
//!
//! This crate provides:
//! - ConnectionManager: one persistent connection with heartbeat and
//!   exponential-backoff reconnection
//! - ChannelDispatcher: handler registry keyed by message type, with `"*"`
//!   wildcard handlers
//! - WebSocketConnector: the production transport
//!
//! Use [`shared`] to obtain the process-wide manager.

mod backoff;
mod client;
mod dispatcher;
mod error;
mod messages;
mod transport;

pub use backoff::ReconnectPolicy;
pub use client::{shared, ConnectionEvent, ConnectionManager, ConnectionState, RelayConfig};
pub use dispatcher::{ChannelDispatcher, Dispatch, Handler, HandlerId, WILDCARD};
pub use error::{RelayError, RelayResult};
pub use messages::{InboundMessage, OutboundMessage, Reserved};
pub use transport::{Connector, Frame, TransportLink, WebSocketConnector};
