//! Short-lived, process-local hints keyed by server id.
//!
//! Both caches read time from an injected [`Clock`] so expiry can be driven in
//! tests without sleeping. Entries are checked lazily on every read; the
//! stopping-intent reaper only bounds memory.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

// ─── TTL cache ───────────────────────────────────────────────────────────────

/// Values remembered for a fixed time after they were observed.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<Uuid, (V, DateTime<Utc>)>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(&id) {
            Some((value, observed)) if now - *observed < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(&id);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, id: Uuid, value: V) {
        let now = self.clock.now();
        self.entries.lock().insert(id, (value, now));
    }

    pub fn expire(&self, id: Uuid) {
        self.entries.lock().remove(&id);
    }
}

// ─── Stopping intents ────────────────────────────────────────────────────────

/// Who recorded a stopping intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOrigin {
    /// An explicit stop (power action or suspension).
    Stop,
    /// The stop half of a restart.
    Restart,
}

#[derive(Debug, Clone, Copy)]
struct Intent {
    deadline: DateTime<Utc>,
    origin: IntentOrigin,
    /// The node call of an explicit stop has not returned yet.
    pending: bool,
}

/// Servers for which a stop was just requested.
///
/// While an entry is live the status resolver reports `stopping` even if the
/// daemon still says the container is running. Explicit stops and restarts
/// record intents with their own origin; each path only clears what it owns.
pub struct StoppingIntents {
    entries: Mutex<HashMap<Uuid, Intent>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl StoppingIntents {
    pub fn new(ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn live(&self, entries: &mut HashMap<Uuid, Intent>, id: Uuid) -> Option<Intent> {
        let now = self.clock.now();
        match entries.get(&id) {
            Some(intent) if intent.deadline > now => Some(*intent),
            Some(_) => {
                entries.remove(&id);
                None
            }
            None => None,
        }
    }

    /// Record an explicit stop. Returns `false` if one is already live, in
    /// which case the existing deadline is kept. A restart's intent is taken
    /// over.
    pub fn begin(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        if let Some(Intent {
            origin: IntentOrigin::Stop,
            ..
        }) = self.live(&mut entries, id)
        {
            return false;
        }
        let deadline = self.clock.now() + self.ttl;
        entries.insert(
            id,
            Intent {
                deadline,
                origin: IntentOrigin::Stop,
                pending: true,
            },
        );
        true
    }

    /// Record the stop half of a restart unless an intent is already live.
    pub fn begin_restart(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        if self.live(&mut entries, id).is_some() {
            return false;
        }
        let deadline = self.clock.now() + self.ttl;
        entries.insert(
            id,
            Intent {
                deadline,
                origin: IntentOrigin::Restart,
                pending: false,
            },
        );
        true
    }

    /// The node accepted an explicit stop. The intent stays live until its
    /// deadline so the status keeps reading `stopping` while the container
    /// shuts down.
    pub fn settle(&self, id: Uuid) {
        if let Some(intent) = self.entries.lock().get_mut(&id) {
            intent.pending = false;
        }
    }

    pub fn is_stopping(&self, id: Uuid) -> bool {
        self.live(&mut self.entries.lock(), id).is_some()
    }

    /// An explicit stop is live for this server.
    pub fn stop_requested(&self, id: Uuid) -> bool {
        self.live(&mut self.entries.lock(), id)
            .is_some_and(|i| i.origin == IntentOrigin::Stop)
    }

    /// Drop the intent only if it was recorded by `origin`.
    pub fn expire_from(&self, id: Uuid, origin: IntentOrigin) {
        let mut entries = self.entries.lock();
        if entries.get(&id).is_some_and(|i| i.origin == origin) {
            entries.remove(&id);
        }
    }

    /// Drop the intent unless an explicit stop is still waiting on the node.
    /// Returns `false` when such a stop was left in place.
    pub fn clear_settled(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        match self.live(&mut entries, id) {
            Some(Intent {
                origin: IntentOrigin::Stop,
                pending: true,
                ..
            }) => false,
            Some(_) => {
                entries.remove(&id);
                true
            }
            None => true,
        }
    }

    pub fn expire(&self, id: Uuid) {
        self.entries.lock().remove(&id);
    }

    /// Drop every elapsed entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, intent| intent.deadline > now);
        before - entries.len()
    }

    /// Periodically purge elapsed entries until `cancel` fires.
    pub fn spawn_reaper(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        if purged > 0 {
                            debug!(purged, "expired stopping intents");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_ttl_cache_expires() {
        let clock = clock();
        let cache = TtlCache::new(chrono::Duration::seconds(10), clock.clone());
        let id = Uuid::new_v4();

        cache.set(id, true);
        clock.advance(chrono::Duration::seconds(9));
        assert_eq!(cache.get(id), Some(true));

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cache.get(id), None);
    }

    #[test]
    fn test_ttl_cache_explicit_expire() {
        let cache = TtlCache::new(chrono::Duration::seconds(10), clock());
        let id = Uuid::new_v4();
        cache.set(id, 7u8);
        cache.expire(id);
        assert_eq!(cache.get(id), None);
    }

    #[test]
    fn test_intent_begin_is_single_shot() {
        let clock = clock();
        let intents = StoppingIntents::new(chrono::Duration::minutes(2), clock.clone());
        let id = Uuid::new_v4();

        assert!(intents.begin(id));
        assert!(!intents.begin(id));
        assert!(intents.is_stopping(id));

        clock.advance(chrono::Duration::minutes(2));
        assert!(!intents.is_stopping(id));
        assert!(intents.begin(id));
    }

    #[test]
    fn test_purge_expired() {
        let clock = clock();
        let intents = StoppingIntents::new(chrono::Duration::minutes(2), clock.clone());
        intents.begin(Uuid::new_v4());
        clock.advance(chrono::Duration::minutes(1));
        let fresh = Uuid::new_v4();
        intents.begin(fresh);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(intents.purge_expired(), 1);
        assert!(intents.is_stopping(fresh));
    }

    #[test]
    fn test_restart_intent_yields_to_explicit_stop() {
        let intents = StoppingIntents::new(chrono::Duration::minutes(2), clock());
        let id = Uuid::new_v4();

        assert!(intents.begin_restart(id));
        assert!(intents.is_stopping(id));
        assert!(!intents.stop_requested(id));

        // a stop during the restart takes the intent over
        assert!(intents.begin(id));
        assert!(intents.stop_requested(id));
        assert!(!intents.begin_restart(id));

        // and the restart cannot clear it
        intents.expire_from(id, IntentOrigin::Restart);
        assert!(intents.stop_requested(id));
    }

    #[test]
    fn test_clear_settled_keeps_pending_stop() {
        let intents = StoppingIntents::new(chrono::Duration::minutes(2), clock());
        let id = Uuid::new_v4();

        intents.begin(id);
        assert!(!intents.clear_settled(id));
        assert!(intents.is_stopping(id));

        intents.settle(id);
        assert!(intents.is_stopping(id));
        assert!(intents.clear_settled(id));
        assert!(!intents.is_stopping(id));
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let intents = Arc::new(StoppingIntents::new(chrono::Duration::minutes(2), clock()));
        let cancel = CancellationToken::new();
        let handle = intents
            .clone()
            .spawn_reaper(Duration::from_millis(5), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper exits")
            .expect("no panic");
    }
}
