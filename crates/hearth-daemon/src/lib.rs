//! Node daemon client for the Hearth panel.
//!
//! Every call authenticates with HTTP Basic (panel username, per-node key) and
//! carries its own timeout. The orchestration core talks to nodes only through
//! [`NodeApi`], so tests can substitute a scripted node.

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod probe;

use async_trait::async_trait;
use hearth_proto::{
    ContainerImageInfo, ContainerStatus, DirEntry, InstallRequest, NodeEndpoint, NodeInfo,
    StartRequest, StopRequest,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use client::DaemonClient;
pub use error::{DaemonError, DaemonResult};
pub use probe::probe_all;

/// Username the panel authenticates as on every node.
pub const PANEL_USERNAME: &str = "hearth";

/// The node control protocol.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Health/version probe. Never fails: an unreachable node is reported as
    /// [`hearth_proto::NODE_OFFLINE`].
    async fn probe(&self, node: &NodeEndpoint) -> NodeInfo;

    async fn container_status(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerStatus>;
    async fn image_info(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerImageInfo>;
    async fn logs(&self, node: &NodeEndpoint, id: Uuid, tail: u32) -> DaemonResult<String>;

    async fn start(&self, node: &NodeEndpoint, request: &StartRequest) -> DaemonResult<()>;
    async fn stop(&self, node: &NodeEndpoint, request: &StopRequest) -> DaemonResult<()>;
    async fn delete_container(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<()>;
    async fn install(&self, node: &NodeEndpoint, request: &InstallRequest) -> DaemonResult<()>;

    async fn file_content(&self, node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<String>;
    async fn list_dir(&self, node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<Vec<DirEntry>>;
}

/// Client settings: identity plus one timeout per endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            timeouts: Timeouts::default(),
        }
    }
}

fn default_username() -> String {
    PANEL_USERNAME.to_string()
}

/// Per-endpoint timeouts in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_probe_ms")]
    pub probe_ms: u64,
    #[serde(default = "default_status_ms")]
    pub status_ms: u64,
    #[serde(default = "default_status_ms")]
    pub image_info_ms: u64,
    #[serde(default = "default_fs_ms")]
    pub logs_ms: u64,
    #[serde(default = "default_power_ms")]
    pub power_ms: u64,
    #[serde(default = "default_power_ms")]
    pub install_ms: u64,
    #[serde(default = "default_fs_ms")]
    pub fs_ms: u64,
    #[serde(default = "default_fs_ms")]
    pub list_ms: u64,
}

fn default_probe_ms() -> u64 {
    3_000
}

fn default_status_ms() -> u64 {
    3_000
}

fn default_fs_ms() -> u64 {
    5_000
}

fn default_power_ms() -> u64 {
    10_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_ms: default_probe_ms(),
            status_ms: default_status_ms(),
            image_info_ms: default_status_ms(),
            logs_ms: default_fs_ms(),
            power_ms: default_power_ms(),
            install_ms: default_power_ms(),
            fs_ms: default_fs_ms(),
            list_ms: default_fs_ms(),
        }
    }
}

impl Timeouts {
    pub(crate) fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}
