//! Fleet-wide node probing

use crate::NodeApi;
use futures_util::future::join_all;
use hearth_proto::{Node, NodeInfo};
use tracing::info;
use uuid::Uuid;

/// Probe every node concurrently. Results keep the input order and each node's
/// outcome is independent of the others.
pub async fn probe_all(api: &dyn NodeApi, nodes: &[Node]) -> Vec<(Uuid, NodeInfo)> {
    let probes = nodes.iter().map(|node| async move {
        let endpoint = node.endpoint();
        (node.id, api.probe(&endpoint).await)
    });
    let results = join_all(probes).await;

    let online = results.iter().filter(|(_, info)| info.is_online()).count();
    info!(total = results.len(), online, "probed nodes");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientConfig, DaemonClient};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn node_for(address: &str, port: u16) -> Node {
        Node {
            id: Uuid::new_v4(),
            name: format!("node-{port}"),
            address: address.to_string(),
            port,
            key: "k".to_string(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn test_one_offline_node_does_not_affect_others() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let dead_port = listener.local_addr().expect("addr").port();
        drop(listener);

        let live = node_for(&server.address().ip().to_string(), server.address().port());
        let dead = node_for("127.0.0.1", dead_port);
        let nodes = vec![live.clone(), dead.clone()];

        let client = DaemonClient::new(ClientConfig::default()).expect("client");
        let results = probe_all(&client, &nodes).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, live.id);
        assert!(results[0].1.is_online());
        assert_eq!(results[1].0, dead.id);
        assert!(!results[1].1.is_online());
    }
}
