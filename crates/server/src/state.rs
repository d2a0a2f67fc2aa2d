//! Process-wide server state.
//!
//! Everything the threads share lives here and is passed by `Arc`;
//! the only statics in the process are the three signal flags.

use crate::config::ServerConfig;
use crate::sessions::Sessions;
use shelf_engine::{BackupEngine, Ops, SubscriptionRegistry};
use shelf_store::Store;
use std::sync::Arc;

/// Shared state for the listener, session workers, job workers, and
/// reaper.
pub struct ServerState {
    /// Parsed command-line configuration.
    pub config: ServerConfig,
    /// The bucketed table.
    pub store: Arc<Store>,
    /// Key to notification-endpoint registry.
    pub subscriptions: Arc<SubscriptionRegistry>,
    /// Operations layer bound to the store and registry.
    pub ops: Arc<Ops>,
    /// Fork-based snapshot engine, gated to `config.max_backups`.
    pub backups: Arc<BackupEngine>,
    /// Session ring and live registry.
    pub sessions: Sessions,
}

impl ServerState {
    /// Wire up the shared pieces for a validated configuration.
    pub fn new(config: ServerConfig) -> Arc<ServerState> {
        let store = Arc::new(Store::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let ops = Arc::new(Ops::new(Arc::clone(&store), Arc::clone(&subscriptions)));
        let backups = Arc::new(BackupEngine::new(config.max_backups));
        Arc::new(ServerState {
            config,
            store,
            subscriptions,
            ops,
            backups,
            sessions: Sessions::new(),
        })
    }

    /// Reload: drop every subscription and signal every connected or
    /// queued session to terminate, without touching the table.
    pub fn reload(&self) {
        self.subscriptions.clear_all();
        self.sessions.disconnect_all();
    }
}
