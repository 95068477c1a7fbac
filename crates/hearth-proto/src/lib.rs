//! Data model and wire types for the Hearth game-server panel.
//!
//! Durable records (nodes, servers, images) are owned by the data store; the
//! wire types mirror the node daemon's HTTP API.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Status string the prober reports when a node cannot be reached.
pub const NODE_OFFLINE: &str = "Offline";
/// Status string assumed when a reachable daemon does not report one.
pub const NODE_ONLINE: &str = "Online";

// ─── Nodes ───────────────────────────────────────────────────────────────────

/// A node daemon host as persisted by the data store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Shared secret, sent as the HTTP Basic password.
    pub key: String,
    #[serde(default)]
    pub tls: bool,
}

impl Node {
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint {
            address: self.address.clone(),
            port: self.port,
            key: self.key.clone(),
            tls: self.tls,
        }
    }
}

/// Everything needed to talk to one daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub address: String,
    pub port: u16,
    pub key: String,
    #[serde(default)]
    pub tls: bool,
}

impl std::fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Derived, non-persisted view of a node produced by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_family: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_release: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeInfo {
    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            status: NODE_OFFLINE.to_string(),
            version_family: None,
            version_release: None,
            remote: false,
            error: Some(error.into()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status != NODE_OFFLINE
    }
}

// ─── Images ──────────────────────────────────────────────────────────────────

/// A server template: container variants, install bundle, startup template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub name: String,
    /// Label → container image reference.
    pub docker_images: BTreeMap<String, String>,
    #[serde(default)]
    pub scripts: InstallBundle,
    pub startup: String,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub info: FeatureInfo,
}

impl Image {
    /// True if `reference` is one of the declared container images.
    pub fn declares(&self, reference: &str) -> bool {
        self.docker_images.values().any(|r| r == reference)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallBundle {
    #[serde(default)]
    pub install: Vec<InstallScript>,
    #[serde(default)]
    pub native: Option<NativeInstaller>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallScript {
    pub url: String,
    pub file_name: String,
    #[serde(default)]
    pub on_start: bool,
    #[serde(default)]
    pub run_as_root: bool,
}

/// Single-command installer run inside a dedicated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeInstaller {
    pub command: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureInfo {
    #[serde(default)]
    pub startup_line: Option<StartupLine>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupLine {
    pub regex: String,
}

// ─── Servers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub cpu: f64,
    pub storage_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub port: u16,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Text,
    Number,
    Boolean,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Environment variable name handed to the container.
    pub env: String,
    /// Display name.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl VariableDefinition {
    /// The configured value, falling back to the default when unset.
    pub fn effective(&self) -> &serde_json::Value {
        if self.value.is_null() {
            &self.default
        } else {
            &self.value
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Stable identity, also the container id on the node.
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub node_id: Uuid,
    pub image_id: Uuid,
    pub limits: ResourceLimits,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    pub start_command: String,
    /// Selected container image; must be declared by the server's image.
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub provision: ProvisionState,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub allow_startup_edit: bool,
}

impl Server {
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.iter().find(|p| p.is_primary).map(|p| p.port)
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// Persisted provisioning progress of a server.
///
/// `Queued` means an install task is waiting or running, `Installing` means the
/// task finished but the node has not yet written its install marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionState {
    #[default]
    Queued,
    Installing,
    Installed,
}

impl ProvisionState {
    pub fn can_transition_to(self, next: ProvisionState) -> bool {
        use ProvisionState::*;
        matches!(
            (self, next),
            (_, Queued) | (Queued, Installing) | (Installing, Installed) | (Installed, Installing)
        )
    }

    pub fn is_installing(self) -> bool {
        !matches!(self, Self::Installed)
    }

    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
        }
    }
}

/// Full lifecycle state, derived from the provision state and a resolved status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Queued,
    Installing,
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    pub fn derive(provision: ProvisionState, status: &ServerStatus) -> Self {
        match provision {
            ProvisionState::Queued => Self::Queued,
            ProvisionState::Installing => Self::Installing,
            ProvisionState::Installed if status.stopping => Self::Stopping,
            ProvisionState::Installed if status.starting => Self::Starting,
            ProvisionState::Installed if status.online => Self::Running,
            ProvisionState::Installed => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Installing => "installing",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// Status reported to the UI. All-false means stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub online: bool,
    pub starting: bool,
    pub stopping: bool,
    /// Whole seconds since the container started.
    pub uptime: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl ServerStatus {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn stopping() -> Self {
        Self {
            stopping: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
        }
    }
}

impl std::str::FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(format!("unknown power action: {other}")),
        }
    }
}

// ─── Node daemon wire types ──────────────────────────────────────────────────

/// `GET /`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonRoot {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version_family: Option<u32>,
    #[serde(default)]
    pub version_release: Option<String>,
    #[serde(default)]
    pub remote: bool,
}

/// `GET /container/status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub started_at: Option<String>,
}

/// `GET /container/image-info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImageInfo {
    #[serde(default)]
    pub startup_line: Option<StartupLine>,
}

/// `POST /container/start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub id: Uuid,
    pub image: String,
    pub ports: Vec<PortMapping>,
    #[serde(rename = "primaryPort", skip_serializing_if = "Option::is_none")]
    pub primary_port: Option<u16>,
    /// Bytes.
    #[serde(rename = "Memory")]
    pub memory: u64,
    #[serde(rename = "Cpu")]
    pub cpu: f64,
    pub env: BTreeMap<String, String>,
    #[serde(rename = "StartCommand")]
    pub start_command: String,
}

/// `POST /container/stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub id: Uuid,
    pub stop_cmd: String,
}

/// `POST /container/install`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub id: Uuid,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub scripts: Vec<InstallStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeInstaller>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallStep {
    pub url: String,
    pub file_name: String,
    pub on_startup: bool,
    pub run_as_root: bool,
}

impl From<&InstallScript> for InstallStep {
    fn from(script: &InstallScript) -> Self {
        Self {
            url: script.url.clone(),
            file_name: script.file_name.clone(),
            on_startup: script.on_start,
            run_as_root: script.run_as_root,
        }
    }
}

/// One entry of `GET /fs/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    /// `None` when the daemon only reported names.
    #[serde(default)]
    pub is_directory: Option<bool>,
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Port mapping rules: at most one primary, no duplicates, no port 0.
pub fn validate_ports(ports: &[PortMapping]) -> Result<(), String> {
    let primaries = ports.iter().filter(|p| p.is_primary).count();
    if primaries > 1 {
        return Err(format!("{primaries} ports marked primary, at most one allowed"));
    }
    let mut seen = HashSet::new();
    for mapping in ports {
        if mapping.port == 0 {
            return Err("port 0 is not allocatable".to_string());
        }
        if !seen.insert(mapping.port) {
            return Err(format!("port {} mapped twice", mapping.port));
        }
    }
    Ok(())
}
