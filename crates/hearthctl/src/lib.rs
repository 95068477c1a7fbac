//! hearthctl library: wiring of the lifecycle service for the CLI.

pub mod config;
pub mod error;

use config::PanelConfig;
use error::CtlResult;
use hearth_daemon::DaemonClient;
use hearth_lifecycle::{InProcessQueue, Lifecycle, ProvisionQueue, SystemClock};
use hearth_store::JsonDataStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A lifecycle service over the on-disk store and real nodes.
pub struct Panel {
    pub lifecycle: Lifecycle,
    queue: Arc<InProcessQueue>,
    reaper: JoinHandle<()>,
}

impl Panel {
    /// Must be called inside a tokio runtime; the provisioning worker and
    /// the stopping-intent reaper are spawned here.
    pub fn open(config: &PanelConfig) -> CtlResult<Self> {
        let store = Arc::new(JsonDataStore::open(&config.state_path));
        let client = Arc::new(DaemonClient::new(config.lifecycle.daemon.clone())?);
        let queue = Arc::new(InProcessQueue::start());
        let lifecycle = Lifecycle::new(
            store,
            client,
            queue.clone(),
            Arc::new(SystemClock),
            config.lifecycle.clone(),
        );
        let reaper = lifecycle.start_reaper();
        Ok(Self {
            lifecycle,
            queue,
            reaper,
        })
    }

    /// Let background stops and queued installs finish before exiting.
    pub async fn close(self) {
        let pending = self.queue.pending();
        if pending > 0 {
            info!(pending, "waiting for provisioning queue");
        }
        self.queue.drain().await;
        self.lifecycle.shutdown().await;
        let _ = self.reaper.await;
    }
}
