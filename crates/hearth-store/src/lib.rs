//! Data store for nodes, servers and images.
//!
//! The orchestration core only depends on [`DataStore`]. [`JsonDataStore`]
//! keeps records in memory and snapshots each collection through
//! [`hearth_persist::JsonStore`] on every write.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use hearth_persist::JsonStore;
use hearth_proto::{Image, Node, PortMapping, ProvisionState, Server, VariableDefinition};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable records consumed by the orchestration core.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_server(&self, id: Uuid) -> StoreResult<Server>;
    async fn list_servers(&self) -> StoreResult<Vec<Server>>;
    async fn get_node(&self, id: Uuid) -> StoreResult<Node>;
    async fn list_nodes(&self) -> StoreResult<Vec<Node>>;
    async fn get_image(&self, id: Uuid) -> StoreResult<Image>;

    async fn put_server(&self, server: Server) -> StoreResult<()>;
    async fn put_node(&self, node: Node) -> StoreResult<()>;
    async fn put_image(&self, image: Image) -> StoreResult<()>;
    async fn remove_server(&self, id: Uuid) -> StoreResult<()>;

    async fn set_provision_state(&self, id: Uuid, state: ProvisionState) -> StoreResult<()>;
    async fn set_suspended(&self, id: Uuid, suspended: bool) -> StoreResult<()>;
    async fn set_docker_image(&self, id: Uuid, image: String) -> StoreResult<()>;
    async fn set_variables(&self, id: Uuid, variables: Vec<VariableDefinition>) -> StoreResult<()>;
    async fn set_start_command(&self, id: Uuid, command: String) -> StoreResult<()>;
    async fn set_ports(&self, id: Uuid, ports: Vec<PortMapping>) -> StoreResult<()>;
}

// ─── JSON-file store ─────────────────────────────────────────────────────────

struct Collection<T> {
    records: RwLock<BTreeMap<String, T>>,
    snapshot: Option<JsonStore>,
}

impl<T: Clone + Serialize + serde::de::DeserializeOwned> Collection<T> {
    fn open(root: &Path, name: &str) -> Self {
        let snapshot = JsonStore::new(root, name);
        let records: BTreeMap<String, T> = snapshot.load();
        debug!(collection = name, count = records.len(), "loaded collection");
        Self {
            records: RwLock::new(records),
            snapshot: Some(snapshot),
        }
    }

    fn ephemeral() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            snapshot: None,
        }
    }

    fn get(&self, kind: &'static str, id: Uuid) -> StoreResult<T> {
        self.records
            .read()
            .get(&id.to_string())
            .cloned()
            .ok_or(StoreError::NotFound { kind, id })
    }

    fn list(&self) -> Vec<T> {
        self.records.read().values().cloned().collect()
    }

    // Writes go to a copy that only replaces the live map once the snapshot
    // is on disk.
    fn put(&self, id: Uuid, record: T) -> StoreResult<()> {
        let mut records = self.records.write();
        let mut next = records.clone();
        next.insert(id.to_string(), record);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn remove(&self, kind: &'static str, id: Uuid) -> StoreResult<()> {
        let mut records = self.records.write();
        let mut next = records.clone();
        if next.remove(&id.to_string()).is_none() {
            return Err(StoreError::NotFound { kind, id });
        }
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn update(&self, kind: &'static str, id: Uuid, apply: impl FnOnce(&mut T)) -> StoreResult<()> {
        let mut records = self.records.write();
        let mut next = records.clone();
        let record = next
            .get_mut(&id.to_string())
            .ok_or(StoreError::NotFound { kind, id })?;
        apply(record);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn persist(&self, records: &BTreeMap<String, T>) -> StoreResult<()> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.save(records)?;
        }
        Ok(())
    }
}

/// In-memory records with optional JSON snapshots under a state directory.
pub struct JsonDataStore {
    servers: Collection<Server>,
    nodes: Collection<Node>,
    images: Collection<Image>,
}

impl JsonDataStore {
    /// Open (or create) a store rooted at `state_path`.
    pub fn open(state_path: &Path) -> Self {
        let store = Self {
            servers: Collection::open(state_path, "servers"),
            nodes: Collection::open(state_path, "nodes"),
            images: Collection::open(state_path, "images"),
        };
        info!(path = %state_path.display(), "data store opened");
        store
    }

    /// A store that never touches disk.
    pub fn ephemeral() -> Self {
        Self {
            servers: Collection::ephemeral(),
            nodes: Collection::ephemeral(),
            images: Collection::ephemeral(),
        }
    }
}

#[async_trait]
impl DataStore for JsonDataStore {
    async fn get_server(&self, id: Uuid) -> StoreResult<Server> {
        self.servers.get("server", id)
    }

    async fn list_servers(&self) -> StoreResult<Vec<Server>> {
        Ok(self.servers.list())
    }

    async fn get_node(&self, id: Uuid) -> StoreResult<Node> {
        self.nodes.get("node", id)
    }

    async fn list_nodes(&self) -> StoreResult<Vec<Node>> {
        Ok(self.nodes.list())
    }

    async fn get_image(&self, id: Uuid) -> StoreResult<Image> {
        self.images.get("image", id)
    }

    async fn put_server(&self, server: Server) -> StoreResult<()> {
        hearth_proto::validate_ports(&server.ports).map_err(StoreError::Invalid)?;
        self.servers.put(server.id, server)
    }

    async fn put_node(&self, node: Node) -> StoreResult<()> {
        self.nodes.put(node.id, node)
    }

    async fn put_image(&self, image: Image) -> StoreResult<()> {
        self.images.put(image.id, image)
    }

    async fn remove_server(&self, id: Uuid) -> StoreResult<()> {
        self.servers.remove("server", id)
    }

    async fn set_provision_state(&self, id: Uuid, state: ProvisionState) -> StoreResult<()> {
        self.servers.update("server", id, |s| s.provision = state)
    }

    async fn set_suspended(&self, id: Uuid, suspended: bool) -> StoreResult<()> {
        self.servers.update("server", id, |s| s.suspended = suspended)
    }

    async fn set_docker_image(&self, id: Uuid, image: String) -> StoreResult<()> {
        self.servers.update("server", id, |s| s.docker_image = Some(image))
    }

    async fn set_variables(&self, id: Uuid, variables: Vec<VariableDefinition>) -> StoreResult<()> {
        self.servers.update("server", id, |s| s.variables = variables)
    }

    async fn set_start_command(&self, id: Uuid, command: String) -> StoreResult<()> {
        self.servers.update("server", id, |s| s.start_command = command)
    }

    async fn set_ports(&self, id: Uuid, ports: Vec<PortMapping>) -> StoreResult<()> {
        hearth_proto::validate_ports(&ports).map_err(StoreError::Invalid)?;
        self.servers.update("server", id, |s| s.ports = ports)
    }
}
