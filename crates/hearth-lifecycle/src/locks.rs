//! Per-server single-flight guards

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per server. Different servers never contend.
#[derive(Default)]
pub struct ServerLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ServerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. The map shard is released before
    /// awaiting so other servers are never blocked.
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the guard slot of a deleted server.
    pub fn forget(&self, id: Uuid) {
        self.locks.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
