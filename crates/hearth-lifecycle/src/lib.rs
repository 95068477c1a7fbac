//! Server lifecycle orchestration for the Hearth panel.
//!
//! [`Lifecycle`] owns the process-local state (stopping intents, marker caches,
//! per-server locks, startup-line patterns) and drives nodes through
//! [`NodeApi`]. Durable records live behind [`DataStore`]; provisioning work is
//! serialised through a [`ProvisionQueue`].

#![forbid(unsafe_code)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod locks;
pub mod queue;
pub mod status;
pub mod worlds;

#[cfg(test)]
mod testing;

use dashmap::DashSet;
use hearth_daemon::NodeApi;
use hearth_proto::{Node, NodeEndpoint, NodeInfo, Server, ServerState, ServerStatus};
use hearth_store::DataStore;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

pub use cache::{IntentOrigin, StoppingIntents, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LifecycleConfig, MarkerFiles, WorldRules};
pub use detect::{EulaStatus, InstallStatus};
pub use dispatch::{ActionKind, ActionOutcome};
pub use env::project_environment;
pub use error::{LifecycleError, LifecycleResult};
pub use locks::ServerLocks;
pub use queue::{InProcessQueue, ProvisionQueue, ProvisionTask};
pub use status::StartupPatterns;

/// Where a server's container lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub node: NodeEndpoint,
    pub id: Uuid,
}

/// Lifecycle state plus the orthogonal suspension flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerView {
    pub id: Uuid,
    pub state: ServerState,
    pub suspended: bool,
    pub status: ServerStatus,
}

/// The orchestration service. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DataStore>,
    node: Arc<dyn NodeApi>,
    queue: Arc<dyn ProvisionQueue>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    intents: Arc<StoppingIntents>,
    installs: TtlCache<bool>,
    eulas: TtlCache<bool>,
    locks: ServerLocks,
    /// Servers with an install task waiting in the queue.
    awaiting_install: DashSet<Uuid>,
    patterns: StartupPatterns,
    background: TaskTracker,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn DataStore>,
        node: Arc<dyn NodeApi>,
        queue: Arc<dyn ProvisionQueue>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        let intents = Arc::new(StoppingIntents::new(config.stopping_intent_ttl(), clock.clone()));
        let installs = TtlCache::new(config.marker_cache_ttl(), clock.clone());
        let eulas = TtlCache::new(config.marker_cache_ttl(), clock.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                node,
                queue,
                clock,
                config,
                intents,
                installs,
                eulas,
                locks: ServerLocks::new(),
                awaiting_install: DashSet::new(),
                patterns: StartupPatterns::default(),
                background: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    pub fn intents(&self) -> &StoppingIntents {
        &self.inner.intents
    }

    /// Start the background sweep of expired stopping intents. Stops on
    /// [`Lifecycle::shutdown`].
    pub fn start_reaper(&self) -> JoinHandle<()> {
        let every = std::time::Duration::from_secs(self.inner.config.reaper_interval_secs.max(1));
        self.inner
            .intents
            .clone()
            .spawn_reaper(every, self.inner.cancel.child_token())
    }

    /// Wait for background node calls (the second half of a stop) to finish.
    pub async fn flush(&self) {
        self.inner.background.close();
        self.inner.background.wait().await;
        self.inner.background.reopen();
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.background.close();
        self.inner.background.wait().await;
    }

    pub fn enqueue(&self, task: ProvisionTask) {
        self.inner.queue.enqueue(task);
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.pending()
    }

    // ─── Node prober ─────────────────────────────────────────────────────

    pub async fn probe_node(&self, node: &Node) -> NodeInfo {
        self.inner.node.probe(&node.endpoint()).await
    }

    pub async fn probe_nodes(&self) -> LifecycleResult<Vec<(Uuid, NodeInfo)>> {
        let nodes = self.inner.store.list_nodes().await?;
        Ok(hearth_daemon::probe_all(self.inner.node.as_ref(), &nodes).await)
    }

    // ─── Lookups ─────────────────────────────────────────────────────────

    pub(crate) async fn target(&self, id: Uuid) -> LifecycleResult<(Server, ServerTarget)> {
        let server = self.inner.store.get_server(id).await?;
        let node = self.inner.store.get_node(server.node_id).await?;
        let target = ServerTarget {
            node: node.endpoint(),
            id: server.id,
        };
        Ok((server, target))
    }

    /// Resolved status of a stored server.
    pub async fn server_status(&self, id: Uuid) -> LifecycleResult<ServerStatus> {
        let (_, target) = self.target(id).await?;
        Ok(self.resolve_status(&target).await)
    }

    /// Derived lifecycle state. The container is only queried once the server
    /// is installed.
    pub async fn server_state(&self, id: Uuid) -> LifecycleResult<ServerView> {
        let (server, target) = self.target(id).await?;
        let status = if server.provision.is_installing() {
            ServerStatus::stopped()
        } else {
            self.resolve_status(&target).await
        };
        Ok(ServerView {
            id,
            state: ServerState::derive(server.provision, &status),
            suspended: server.suspended,
            status,
        })
    }
}
