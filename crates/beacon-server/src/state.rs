use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::broadcast::Broker;
use crate::config::BeaconConfig;

pub type SharedBroker = Arc<RwLock<Broker>>;

#[derive(Clone)]
pub struct AppState {
    pub broker: SharedBroker,
    pub config: Arc<BeaconConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: BeaconConfig) -> Self {
        let broker = Broker::with_rooms(&config.rooms);
        Self {
            broker: Arc::new(RwLock::new(broker)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// RAII counter for live WebSocket connections.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
