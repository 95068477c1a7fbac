//! Shared fixtures for the Hearth integration tests: a mock node daemon
//! (wiremock) and a seeded in-memory data store.

use hearth_daemon::{ClientConfig, DaemonClient};
use hearth_lifecycle::{InProcessQueue, Lifecycle, LifecycleConfig, SystemClock};
use hearth_proto::{
    FeatureInfo, Image, InstallBundle, InstallScript, Node, PortMapping, ProvisionState,
    ResourceLimits, Server, VariableDefinition, VariableType,
};
use hearth_store::{DataStore, JsonDataStore};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::MockServer;

pub const NODE_KEY: &str = "s3cret";
pub const IMAGE_REF: &str = "ghcr.io/hearth/java:21";

/// A node record pointing at `address:port`.
pub fn node_at(address: &str, port: u16) -> Node {
    Node {
        id: Uuid::new_v4(),
        name: format!("node-{port}"),
        address: address.to_string(),
        port,
        key: NODE_KEY.to_string(),
        tls: false,
    }
}

pub fn node_for(daemon: &MockServer) -> Node {
    let addr = daemon.address();
    node_at(&addr.ip().to_string(), addr.port())
}

/// A localhost port with nothing listening on it.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

pub fn paper_image() -> Image {
    Image {
        id: Uuid::new_v4(),
        name: "Paper".to_string(),
        docker_images: BTreeMap::from([("Java 21".to_string(), IMAGE_REF.to_string())]),
        scripts: InstallBundle {
            install: vec![InstallScript {
                url: "https://get.hearth.gg/paper/install.sh".to_string(),
                file_name: "install.sh".to_string(),
                on_start: false,
                run_as_root: true,
            }],
            native: None,
        },
        startup: "java -jar server.jar".to_string(),
        stop_command: Some("stop".to_string()),
        info: FeatureInfo::default(),
    }
}

pub fn server_on(node: &Node, image: &Image) -> Server {
    Server {
        id: Uuid::new_v4(),
        name: "survival".to_string(),
        owner_id: Uuid::new_v4(),
        node_id: node.id,
        image_id: image.id,
        limits: ResourceLimits {
            memory_mb: 1024,
            cpu: 1.5,
            storage_mb: 8192,
        },
        ports: vec![PortMapping {
            port: 25565,
            is_primary: true,
        }],
        variables: vec![VariableDefinition {
            env: "MAX_PLAYERS".to_string(),
            name: "Max players".to_string(),
            kind: VariableType::Number,
            default: json!(20),
            value: serde_json::Value::Null,
        }],
        start_command: String::new(),
        docker_image: Some(IMAGE_REF.to_string()),
        provision: ProvisionState::Installed,
        suspended: false,
        allow_startup_edit: false,
    }
}

/// A lifecycle over an ephemeral store and the real HTTP client.
pub struct Harness {
    pub lifecycle: Lifecycle,
    pub store: Arc<JsonDataStore>,
    pub queue: Arc<InProcessQueue>,
}

impl Harness {
    pub fn new() -> Self {
        let mut config = LifecycleConfig {
            settle_delay_ms: 0,
            daemon: ClientConfig::default(),
            ..LifecycleConfig::default()
        };
        config.daemon.timeouts.probe_ms = 500;
        config.daemon.timeouts.status_ms = 500;

        let store = Arc::new(JsonDataStore::ephemeral());
        let client = Arc::new(DaemonClient::new(config.daemon.clone()).expect("client"));
        let queue = Arc::new(InProcessQueue::start());
        let lifecycle = Lifecycle::new(
            store.clone(),
            client,
            queue.clone(),
            Arc::new(SystemClock),
            config,
        );
        Self {
            lifecycle,
            store,
            queue,
        }
    }

    /// Register a node, the Paper image and one server; returns the server.
    pub async fn seed(&self, node: &Node, customise: impl FnOnce(&mut Server)) -> Server {
        let image = paper_image();
        let mut server = server_on(node, &image);
        customise(&mut server);
        self.store.put_node(node.clone()).await.expect("node");
        self.store.put_image(image).await.expect("image");
        self.store.put_server(server.clone()).await.expect("server");
        server
    }

    pub async fn server(&self, id: Uuid) -> Server {
        self.store.get_server(id).await.expect("server")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
