//! Handler registry and message demultiplexing.

use crate::{InboundMessage, Reserved};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handler type that receives every inbound message.
pub const WILDCARD: &str = "*";

/// A registered message handler.
pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Handle returned by [`ChannelDispatcher::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Not a valid message; dropped.
    Malformed,
    /// Reserved type, left to the connection.
    Reserved(Reserved),
    /// Domain message, passed to this many handlers.
    Delivered { handlers: usize },
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_type: HashMap<String, Vec<(HandlerId, Handler)>>,
}

/// Registry of handlers keyed by message type.
///
/// Cloning shares the registry. Handlers for the exact type run first, then
/// wildcard handlers, each group in registration order. A panicking handler
/// is logged and skipped; the rest still run.
#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    registry: Arc<RwLock<Registry>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`, or for every message with [`WILDCARD`].
    pub fn on<F>(&self, kind: &str, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = HandlerId(registry.next_id);
        registry
            .by_type
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns `false` if it was already removed.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut registry = self.registry.write();
        let mut removed = false;
        registry.by_type.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    /// Registered channel names, sorted, excluding the wildcard.
    pub fn channels(&self) -> Vec<String> {
        let registry = self.registry.read();
        let mut channels: Vec<String> = registry
            .by_type
            .keys()
            .filter(|kind| kind.as_str() != WILDCARD)
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    /// Whether any handler is registered for exactly `kind`.
    pub fn has_handlers(&self, kind: &str) -> bool {
        self.registry.read().by_type.contains_key(kind)
    }

    /// Parse one text frame and dispatch it.
    pub fn dispatch(&self, text: &str) -> Dispatch {
        match InboundMessage::from_json(text) {
            Ok(message) => self.dispatch_message(&message),
            Err(e) => {
                debug!(error = %e, "Dropping malformed push message");
                Dispatch::Malformed
            }
        }
    }

    /// Dispatch a parsed message.
    pub fn dispatch_message(&self, message: &InboundMessage) -> Dispatch {
        if let Some(reserved) = message.reserved() {
            return Dispatch::Reserved(reserved);
        }

        // Snapshot so handlers may register or unregister without deadlock.
        let handlers: Vec<Handler> = {
            let registry = self.registry.read();
            let exact = registry.by_type.get(&message.kind).into_iter().flatten();
            let wildcard = registry.by_type.get(WILDCARD).into_iter().flatten();
            exact.chain(wildcard).map(|(_, h)| h.clone()).collect()
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                warn!(kind = %message.kind, "Push handler panicked");
            }
        }

        Dispatch::Delivered {
            handlers: handlers.len(),
        }
    }
}
