//! Push-channel to cache invalidation bridge.

use crate::{QueryCache, Scope};
use parking_lot::Mutex;
use push_relay::{ConnectionManager, HandlerId, InboundMessage};
use std::sync::Arc;
use tracing::{debug, info};

/// Channels the viewer listens to.
pub const SYNC_CHANNELS: [&str; 5] = ["project", "task", "session", "event", "stats"];

/// Marks cached queries stale when the control plane announces a change.
///
/// Handlers never read message payloads; a message only names the channel
/// whose scopes become stale. Values are pulled by the next read.
pub struct SyncBridge {
    manager: Arc<ConnectionManager>,
    cache: Arc<QueryCache>,
    handlers: Mutex<Vec<HandlerId>>,
}

impl SyncBridge {
    /// Register the channel handlers and start connecting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(manager: Arc<ConnectionManager>, cache: Arc<QueryCache>) -> Self {
        let handlers = SYNC_CHANNELS
            .iter()
            .map(|channel| {
                let scopes = Scope::for_channel(channel);
                let cache = cache.clone();
                manager.on(channel, move |message: &InboundMessage| {
                    let marked: usize = scopes
                        .iter()
                        .map(|scope| cache.invalidate_scope(*scope))
                        .sum();
                    debug!(
                        channel = %message.kind,
                        action = ?message.action,
                        marked = marked,
                        "Cache invalidated"
                    );
                })
            })
            .collect();

        manager.connect();
        info!(channels = ?SYNC_CHANNELS, "Sync bridge mounted");

        Self {
            manager,
            cache,
            handlers: Mutex::new(handlers),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Unregister the handlers and close the connection.
    pub async fn unmount(&self) {
        self.unregister();
        self.manager.disconnect().await;
        info!("Sync bridge unmounted");
    }

    fn unregister(&self) {
        for id in self.handlers.lock().drain(..) {
            self.manager.off(id);
        }
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        self.unregister();
    }
}
