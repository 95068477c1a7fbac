//! reqwest-backed implementation of [`NodeApi`]

use crate::error::{DaemonError, DaemonResult};
use crate::{ClientConfig, NodeApi, Timeouts};
use async_trait::async_trait;
use hearth_proto::{
    ContainerImageInfo, ContainerStatus, DaemonRoot, DirEntry, InstallRequest, NODE_ONLINE,
    NodeEndpoint, NodeInfo, StartRequest, StopRequest,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Shared HTTP client for all nodes.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    config: ClientConfig,
}

/// `/fs/list` entries come back either as bare names or as objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListedEntry {
    Name(String),
    Entry(DirEntry),
}

impl From<ListedEntry> for DirEntry {
    fn from(entry: ListedEntry) -> Self {
        match entry {
            ListedEntry::Name(name) => DirEntry {
                name,
                is_directory: None,
            },
            ListedEntry::Entry(entry) => entry,
        }
    }
}

impl DaemonClient {
    pub fn new(config: ClientConfig) -> DaemonResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| DaemonError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn timeouts(&self) -> &Timeouts {
        &self.config.timeouts
    }

    fn url(node: &NodeEndpoint, path: &str) -> DaemonResult<Url> {
        let scheme = if node.tls { "https" } else { "http" };
        let base = format!("{scheme}://{}:{}", node.address, node.port);
        Url::parse(&base)
            .and_then(|base| base.join(path))
            .map_err(|e| DaemonError::Address(format!("{base}{path}: {e}")))
    }

    fn request(
        &self,
        node: &NodeEndpoint,
        method: Method,
        path: &str,
        timeout_ms: u64,
    ) -> DaemonResult<RequestBuilder> {
        let url = Self::url(node, path)?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.config.username, Some(&node.key))
            .timeout(Timeouts::ms(timeout_ms)))
    }

    async fn send(builder: RequestBuilder) -> DaemonResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DaemonError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DaemonError::Status {
                code: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        node: &NodeEndpoint,
        path: &str,
        query: &[(&str, String)],
        timeout_ms: u64,
    ) -> DaemonResult<T> {
        let builder = self.request(node, Method::GET, path, timeout_ms)?.query(query);
        let response = Self::send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| DaemonError::Decode(e.to_string()))
    }

    async fn get_text(
        &self,
        node: &NodeEndpoint,
        path: &str,
        query: &[(&str, String)],
        timeout_ms: u64,
    ) -> DaemonResult<String> {
        let builder = self.request(node, Method::GET, path, timeout_ms)?.query(query);
        Ok(Self::send(builder).await?.text().await?)
    }

    async fn send_json<B: serde::Serialize + ?Sized>(
        &self,
        node: &NodeEndpoint,
        method: Method,
        path: &str,
        body: &B,
        timeout_ms: u64,
    ) -> DaemonResult<()> {
        let builder = self.request(node, method, path, timeout_ms)?.json(body);
        Self::send(builder).await.map(|_| ())
    }
}

#[async_trait]
impl NodeApi for DaemonClient {
    async fn probe(&self, node: &NodeEndpoint) -> NodeInfo {
        let builder = match self.request(node, Method::GET, "/", self.timeouts().probe_ms) {
            Ok(builder) => builder,
            Err(e) => return NodeInfo::offline(e.to_string()),
        };
        let response = match Self::send(builder).await {
            Ok(response) => response,
            Err(e) => {
                debug!(node = %node, error = %e, "node probe failed");
                return NodeInfo::offline(e.to_string());
            }
        };
        let root: DaemonRoot = response.json().await.unwrap_or_else(|e| {
            warn!(node = %node, error = %e, "node root returned an unreadable body");
            DaemonRoot::default()
        });
        NodeInfo {
            status: root.status.unwrap_or_else(|| NODE_ONLINE.to_string()),
            version_family: root.version_family,
            version_release: root.version_release,
            remote: root.remote,
            error: None,
        }
    }

    async fn container_status(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerStatus> {
        let query = [("id", id.to_string())];
        self.get_json(node, "/container/status", &query, self.timeouts().status_ms)
            .await
    }

    async fn image_info(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<ContainerImageInfo> {
        let query = [("id", id.to_string())];
        self.get_json(node, "/container/image-info", &query, self.timeouts().image_info_ms)
            .await
    }

    async fn logs(&self, node: &NodeEndpoint, id: Uuid, tail: u32) -> DaemonResult<String> {
        let query = [("id", id.to_string()), ("tail", tail.to_string())];
        self.get_text(node, "/container/logs", &query, self.timeouts().logs_ms)
            .await
    }

    async fn start(&self, node: &NodeEndpoint, request: &StartRequest) -> DaemonResult<()> {
        self.send_json(node, Method::POST, "/container/start", request, self.timeouts().power_ms)
            .await
    }

    async fn stop(&self, node: &NodeEndpoint, request: &StopRequest) -> DaemonResult<()> {
        self.send_json(node, Method::POST, "/container/stop", request, self.timeouts().power_ms)
            .await
    }

    async fn delete_container(&self, node: &NodeEndpoint, id: Uuid) -> DaemonResult<()> {
        let body = serde_json::json!({ "id": id });
        self.send_json(node, Method::DELETE, "/container", &body, self.timeouts().power_ms)
            .await
    }

    async fn install(&self, node: &NodeEndpoint, request: &InstallRequest) -> DaemonResult<()> {
        self.send_json(node, Method::POST, "/container/install", request, self.timeouts().install_ms)
            .await
    }

    async fn file_content(&self, node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<String> {
        let query = [("id", id.to_string()), ("path", path.to_string())];
        self.get_text(node, "/fs/file/content", &query, self.timeouts().fs_ms)
            .await
    }

    async fn list_dir(&self, node: &NodeEndpoint, id: Uuid, path: &str) -> DaemonResult<Vec<DirEntry>> {
        let query = [("id", id.to_string()), ("path", path.to_string())];
        let entries: Vec<ListedEntry> = self
            .get_json(node, "/fs/list", &query, self.timeouts().list_ms)
            .await?;
        Ok(entries.into_iter().map(DirEntry::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::{NODE_OFFLINE, PortMapping};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // "hearth:s3cret"
    const BASIC_AUTH: &str = "Basic aGVhcnRoOnMzY3JldA==";

    fn endpoint(server: &MockServer) -> NodeEndpoint {
        let addr = server.address();
        NodeEndpoint {
            address: addr.ip().to_string(),
            port: addr.port(),
            key: "s3cret".to_string(),
            tls: false,
        }
    }

    fn client() -> DaemonClient {
        let mut config = ClientConfig::default();
        config.timeouts.probe_ms = 300;
        config.timeouts.status_ms = 300;
        DaemonClient::new(config).expect("client")
    }

    #[tokio::test]
    async fn test_probe_online_reports_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", BASIC_AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "versionFamily": 1,
                "versionRelease": "1.4.2",
                "remote": true
            })))
            .mount(&server)
            .await;

        let info = client().probe(&endpoint(&server)).await;
        assert_eq!(info.status, "Online");
        assert_eq!(info.version_family, Some(1));
        assert_eq!(info.version_release.as_deref(), Some("1.4.2"));
        assert!(info.remote);
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_non_2xx_is_offline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let info = client().probe(&endpoint(&server)).await;
        assert_eq!(info.status, NODE_OFFLINE);
        assert!(info.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_timeout_is_offline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let info = client().probe(&endpoint(&server)).await;
        assert_eq!(info.status, NODE_OFFLINE);
    }

    #[tokio::test]
    async fn test_probe_refused_is_offline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let node = NodeEndpoint {
            address: "127.0.0.1".to_string(),
            port,
            key: "s3cret".to_string(),
            tls: false,
        };
        let info = client().probe(&node).await;
        assert_eq!(info.status, NODE_OFFLINE);
    }

    #[tokio::test]
    async fn test_container_status_query() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/container/status"))
            .and(query_param("id", id.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "running": true,
                "startedAt": "2026-10-18T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let status = client()
            .container_status(&endpoint(&server), id)
            .await
            .expect("status");
        assert!(status.running);
        assert_eq!(status.started_at.as_deref(), Some("2026-10-18T12:00:00Z"));
    }

    #[tokio::test]
    async fn test_stop_404_maps_to_not_found() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/container/stop"))
            .and(body_json(serde_json::json!({ "id": id, "stopCmd": "stop" })))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client()
            .stop(
                &endpoint(&server),
                &StopRequest {
                    id,
                    stop_cmd: "stop".to_string(),
                },
            )
            .await
            .expect_err("404");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_start_error_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/container/start"))
            .respond_with(ResponseTemplate::new(500).set_body_string("image pull failed"))
            .mount(&server)
            .await;

        let request = StartRequest {
            id: Uuid::new_v4(),
            image: "ghcr.io/hearth/java:21".to_string(),
            ports: vec![PortMapping {
                port: 25565,
                is_primary: true,
            }],
            primary_port: Some(25565),
            memory: 1024,
            cpu: 1.0,
            env: BTreeMap::new(),
            start_command: "java -jar server.jar".to_string(),
        };
        let err = client()
            .start(&endpoint(&server), &request)
            .await
            .expect_err("500");
        match err {
            DaemonError::Status { code, body } => {
                assert_eq!(code, 500);
                assert_eq!(body, "image pull failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_dir_accepts_names_and_objects() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/fs/list"))
            .and(query_param("path", "world"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "level.dat",
                { "name": "region", "isDirectory": true }
            ])))
            .mount(&server)
            .await;

        let entries = client()
            .list_dir(&endpoint(&server), id, "world")
            .await
            .expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "level.dat");
        assert_eq!(entries[0].is_directory, None);
        assert_eq!(entries[1].is_directory, Some(true));
    }

    #[tokio::test]
    async fn test_file_content_text() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/fs/file/content"))
            .and(query_param("path", "eula.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("eula=true\n"))
            .mount(&server)
            .await;

        let content = client()
            .file_content(&endpoint(&server), id, "eula.txt")
            .await
            .expect("content");
        assert!(content.contains("eula=true"));
    }
}
