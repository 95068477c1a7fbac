//! Scripted node and fixtures for lifecycle tests

use crate::clock::ManualClock;
use crate::config::LifecycleConfig;
use crate::queue::InProcessQueue;
use crate::{Lifecycle, ServerTarget};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hearth_daemon::{DaemonError, DaemonResult, NodeApi};
use hearth_proto::{
    ContainerImageInfo, ContainerStatus, DirEntry, FeatureInfo, Image, InstallBundle,
    InstallRequest, InstallScript, NODE_ONLINE, Node, NodeEndpoint, NodeInfo, PortMapping,
    ProvisionState, ResourceLimits, Server, StartRequest, StartupLine, StopRequest,
    VariableDefinition, VariableType,
};
use hearth_store::{DataStore, JsonDataStore};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const IMAGE_REF: &str = "ghcr.io/hearth/java:21";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe,
    Status(Uuid),
    ImageInfo(Uuid),
    Logs(Uuid, u32),
    Start(Uuid),
    Stop(Uuid),
    Delete(Uuid),
    Install(Uuid),
    File(Uuid, String),
    List(Uuid, String),
}

#[derive(Default)]
struct Script {
    offline: bool,
    running: bool,
    started_at: Option<String>,
    startup_line: Option<String>,
    logs: String,
    files: HashMap<String, String>,
    dirs: HashMap<String, Vec<DirEntry>>,
    status_error: Option<DaemonError>,
    logs_error: Option<DaemonError>,
    stop_error: Option<DaemonError>,
    delete_error: Option<DaemonError>,
    install_error: Option<DaemonError>,
    file_error: Option<DaemonError>,
}

/// A node whose answers are set by the test. Every call is recorded.
#[derive(Default)]
pub struct FakeNode {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    starts: Mutex<Vec<StartRequest>>,
    stops: Mutex<Vec<StopRequest>>,
    installs: Mutex<Vec<InstallRequest>>,
}

impl FakeNode {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn starts(&self) -> Vec<StartRequest> {
        self.starts.lock().clone()
    }

    pub fn stops(&self) -> Vec<StopRequest> {
        self.stops.lock().clone()
    }

    pub fn installs(&self) -> Vec<InstallRequest> {
        self.installs.lock().clone()
    }

    pub fn set_online(&self, online: bool) {
        self.script.lock().offline = !online;
    }

    pub fn set_running(&self, running: bool, started_at: Option<String>) {
        let mut script = self.script.lock();
        script.running = running;
        script.started_at = started_at;
    }

    pub fn set_startup_line(&self, regex: Option<&str>) {
        self.script.lock().startup_line = regex.map(str::to_string);
    }

    pub fn set_logs(&self, logs: &str) {
        self.script.lock().logs = logs.to_string();
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.script
            .lock()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn put_dir(&self, path: &str, entries: Vec<DirEntry>) {
        self.script.lock().dirs.insert(path.to_string(), entries);
    }

    pub fn fail_status(&self, e: DaemonError) {
        self.script.lock().status_error = Some(e);
    }

    pub fn fail_logs(&self, e: DaemonError) {
        self.script.lock().logs_error = Some(e);
    }

    pub fn fail_stop(&self, e: DaemonError) {
        self.script.lock().stop_error = Some(e);
    }

    pub fn fail_delete(&self, e: DaemonError) {
        self.script.lock().delete_error = Some(e);
    }

    pub fn fail_install(&self, e: DaemonError) {
        self.script.lock().install_error = Some(e);
    }

    pub fn fail_files(&self, e: DaemonError) {
        self.script.lock().file_error = Some(e);
    }

    pub fn clear_file_error(&self) {
        self.script.lock().file_error = None;
    }

    fn record(&self, call: Call) -> DaemonResult<()> {
        self.calls.lock().push(call);
        if self.script.lock().offline {
            return Err(DaemonError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

fn scripted(error: &Option<DaemonError>) -> DaemonResult<()> {
    match error {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn probe(&self, _node: &NodeEndpoint) -> NodeInfo {
        if self.record(Call::Probe).is_err() {
            return NodeInfo::offline("connection refused");
        }
        NodeInfo {
            status: NODE_ONLINE.to_string(),
            version_family: Some(1),
            version_release: Some("1.4.0".to_string()),
            remote: false,
            error: None,
        }
    }

    async fn container_status(&self, _node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerStatus> {
        self.record(Call::Status(id))?;
        let script = self.script.lock();
        scripted(&script.status_error)?;
        Ok(ContainerStatus {
            running: script.running,
            started_at: script.started_at.clone(),
        })
    }

    async fn image_info(&self, _node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerImageInfo> {
        self.record(Call::ImageInfo(id))?;
        Ok(ContainerImageInfo {
            startup_line: self
                .script
                .lock()
                .startup_line
                .clone()
                .map(|regex| StartupLine { regex }),
        })
    }

    async fn logs(&self, _node: &NodeEndpoint, id: Uuid, tail: u32) -> DaemonResult<String> {
        self.record(Call::Logs(id, tail))?;
        let script = self.script.lock();
        scripted(&script.logs_error)?;
        Ok(script.logs.clone())
    }

    async fn start(&self, _node: &NodeEndpoint, request: &StartRequest) -> DaemonResult<()> {
        self.record(Call::Start(request.id))?;
        self.starts.lock().push(request.clone());
        self.script.lock().running = true;
        Ok(())
    }

    async fn stop(&self, _node: &NodeEndpoint, request: &StopRequest) -> DaemonResult<()> {
        self.record(Call::Stop(request.id))?;
        self.stops.lock().push(request.clone());
        let mut script = self.script.lock();
        scripted(&script.stop_error)?;
        script.running = false;
        Ok(())
    }

    async fn delete_container(&self, _node: &NodeEndpoint, id: Uuid) -> DaemonResult<()> {
        self.record(Call::Delete(id))?;
        let mut script = self.script.lock();
        scripted(&script.delete_error)?;
        script.running = false;
        Ok(())
    }

    async fn install(&self, _node: &NodeEndpoint, request: &InstallRequest) -> DaemonResult<()> {
        self.record(Call::Install(request.id))?;
        self.installs.lock().push(request.clone());
        scripted(&self.script.lock().install_error)
    }

    async fn file_content(&self, _node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<String> {
        self.record(Call::File(id, path.to_string()))?;
        let script = self.script.lock();
        scripted(&script.file_error)?;
        script.files.get(path).cloned().ok_or(DaemonError::NotFound)
    }

    async fn list_dir(&self, _node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<Vec<DirEntry>> {
        self.record(Call::List(id, path.to_string()))?;
        self.script
            .lock()
            .dirs
            .get(path)
            .cloned()
            .ok_or(DaemonError::NotFound)
    }
}

pub fn entry(name: &str, is_directory: bool) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        is_directory: Some(is_directory),
    }
}

/// One node, one image, one installed server wired into a [`Lifecycle`].
pub struct Fixture {
    pub lifecycle: Lifecycle,
    pub node: Arc<FakeNode>,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<InProcessQueue>,
    pub server_id: Uuid,
    pub node_record: Node,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with(|_| {}).await
    }

    pub async fn with(customise: impl FnOnce(&mut Server)) -> Self {
        Self::build(customise, |_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut LifecycleConfig)) -> Self {
        Self::build(|_| {}, configure).await
    }

    async fn build(customise: impl FnOnce(&mut Server), configure: impl FnOnce(&mut LifecycleConfig)) -> Self {
        let store = Arc::new(JsonDataStore::ephemeral());
        let node_record = Node {
            id: Uuid::new_v4(),
            name: "fsn1-01".to_string(),
            address: "10.0.0.5".to_string(),
            port: 8080,
            key: "s3cret".to_string(),
            tls: false,
        };
        let image = Image {
            id: Uuid::new_v4(),
            name: "Paper".to_string(),
            docker_images: BTreeMap::from([
                ("Java 21".to_string(), IMAGE_REF.to_string()),
                ("Java 17".to_string(), "ghcr.io/hearth/java:17".to_string()),
            ]),
            scripts: InstallBundle {
                install: vec![InstallScript {
                    url: "https://get.hearth.gg/paper/install.sh".to_string(),
                    file_name: "install.sh".to_string(),
                    on_start: false,
                    run_as_root: false,
                }],
                native: None,
            },
            startup: "java -jar server.jar".to_string(),
            stop_command: Some("stop".to_string()),
            info: FeatureInfo {
                startup_line: None,
                features: vec!["eula".to_string(), "worlds".to_string()],
            },
        };
        let mut server = Server {
            id: Uuid::new_v4(),
            name: "survival".to_string(),
            owner_id: Uuid::new_v4(),
            node_id: node_record.id,
            image_id: image.id,
            limits: ResourceLimits {
                memory_mb: 2048,
                cpu: 2.0,
                storage_mb: 10_240,
            },
            ports: vec![
                PortMapping {
                    port: 25565,
                    is_primary: true,
                },
                PortMapping {
                    port: 25575,
                    is_primary: false,
                },
            ],
            variables: vec![
                VariableDefinition {
                    env: "MAX_PLAYERS".to_string(),
                    name: "Max players".to_string(),
                    kind: VariableType::Number,
                    default: json!(10),
                    value: json!(20),
                },
                VariableDefinition {
                    env: "ONLINE_MODE".to_string(),
                    name: "Online mode".to_string(),
                    kind: VariableType::Boolean,
                    default: json!(false),
                    value: json!("1"),
                },
            ],
            start_command: "java -Xms128M -jar server.jar".to_string(),
            docker_image: Some(IMAGE_REF.to_string()),
            provision: ProvisionState::Installed,
            suspended: false,
            allow_startup_edit: true,
        };
        customise(&mut server);

        store.put_node(node_record.clone()).await.expect("node");
        store.put_image(image).await.expect("image");
        store.put_server(server.clone()).await.expect("server");

        let node = Arc::new(FakeNode::default());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let queue = Arc::new(InProcessQueue::start());
        let mut config = LifecycleConfig {
            settle_delay_ms: 0,
            ..LifecycleConfig::default()
        };
        configure(&mut config);
        let lifecycle = Lifecycle::new(store, node.clone(), queue.clone(), clock.clone(), config);

        Self {
            lifecycle,
            node,
            clock,
            queue,
            server_id: server.id,
            node_record,
        }
    }

    pub fn target(&self) -> ServerTarget {
        ServerTarget {
            node: self.node_record.endpoint(),
            id: self.server_id,
        }
    }

    pub async fn server(&self) -> Server {
        self.lifecycle
            .store()
            .get_server(self.server_id)
            .await
            .expect("server")
    }
}

/// Poll `condition` until it holds, failing the test after a second.
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
