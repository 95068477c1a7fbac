//! Installation and EULA detection from daemon-hosted marker files.
//!
//! Both checks probe the node first. An unreachable node reads as "not
//! installed" but as "EULA accepted"; the EULA wall is never shown for a node
//! that cannot be asked.

use crate::cache::TtlCache;
use crate::error::LifecycleResult;
use crate::{Lifecycle, ServerTarget};
use hearth_proto::{ProvisionState, Server};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstallStatus {
    pub installed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EulaStatus {
    pub accepted: bool,
}

impl Lifecycle {
    pub async fn check_installed(&self, id: uuid::Uuid) -> LifecycleResult<InstallStatus> {
        let (server, target) = self.target(id).await?;
        if !self.inner.node.probe(&target.node).await.is_online() {
            debug!(server = %id, node = %target.node, "node offline, reporting not installed");
            return Ok(InstallStatus { installed: false });
        }

        let markers = &self.inner.config.markers;
        let observed = self
            .read_marker(&self.inner.installs, &target, &markers.install_path, &markers.install_literal)
            .await;
        if let Some(installed) = observed {
            self.mirror_install(&server, installed).await;
        }
        Ok(InstallStatus {
            installed: observed.unwrap_or(false),
        })
    }

    pub async fn check_eula(&self, id: uuid::Uuid) -> LifecycleResult<EulaStatus> {
        let (_, target) = self.target(id).await?;
        if !self.inner.node.probe(&target.node).await.is_online() {
            debug!(server = %id, node = %target.node, "node offline, reporting eula accepted");
            return Ok(EulaStatus { accepted: true });
        }

        let markers = &self.inner.config.markers;
        let accepted = self
            .read_marker(&self.inner.eulas, &target, &markers.eula_path, &markers.eula_literal)
            .await
            .unwrap_or(false);
        Ok(EulaStatus { accepted })
    }

    /// Cached marker lookup. A missing file reads as `false`; `None` means the
    /// node could not answer and nothing was cached.
    async fn read_marker(
        &self,
        cache: &TtlCache<bool>,
        target: &ServerTarget,
        path: &str,
        literal: &str,
    ) -> Option<bool> {
        if let Some(hit) = cache.get(target.id) {
            return Some(hit);
        }
        let found = match self.inner.node.file_content(&target.node, target.id, path).await {
            Ok(content) => content.contains(literal),
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(server = %target.id, path, error = %e, "marker file unreadable");
                return None;
            }
        };
        cache.set(target.id, found);
        Some(found)
    }

    /// Bring the persisted provision state in line with the install marker.
    /// A queued server is left alone; its install task owns the state.
    async fn mirror_install(&self, server: &Server, installed: bool) {
        let next = match (server.provision, installed) {
            (ProvisionState::Installing, true) => ProvisionState::Installed,
            (ProvisionState::Installed, false) => ProvisionState::Installing,
            _ => return,
        };
        match self.inner.store.set_provision_state(server.id, next).await {
            Ok(()) => info!(server = %server.id, from = %server.provision, to = %next, "provision state healed"),
            Err(e) => warn!(server = %server.id, error = %e, "could not persist provision state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Call, Fixture};
    use hearth_daemon::DaemonError;
    use hearth_proto::ProvisionState;

    fn file_reads(fx: &Fixture) -> usize {
        fx.node
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::File(..)))
            .count()
    }

    #[tokio::test]
    async fn test_installed_marker() {
        let fx = Fixture::new().await;
        fx.node.put_file("install.log", "step 1 ok\nInstalled: true\n");
        assert!(fx.lifecycle.check_installed(fx.server_id).await.unwrap().installed);
    }

    #[tokio::test]
    async fn test_missing_marker_is_not_installed() {
        let fx = Fixture::new().await;
        assert!(!fx.lifecycle.check_installed(fx.server_id).await.unwrap().installed);
    }

    #[tokio::test]
    async fn test_install_check_is_cached_for_ten_seconds() {
        let fx = Fixture::new().await;
        fx.node.put_file("install.log", "Installed: true");

        let first = fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        fx.clock.advance(chrono::Duration::seconds(9));
        let second = fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(file_reads(&fx), 1);

        fx.clock.advance(chrono::Duration::seconds(1));
        fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        assert_eq!(file_reads(&fx), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_cached() {
        let fx = Fixture::new().await;
        fx.node.fail_files(DaemonError::Timeout);
        assert!(!fx.lifecycle.check_installed(fx.server_id).await.unwrap().installed);

        fx.node.clear_file_error();
        fx.node.put_file("install.log", "Installed: true");
        assert!(fx.lifecycle.check_installed(fx.server_id).await.unwrap().installed);
    }

    #[tokio::test]
    async fn test_offline_node_asymmetry() {
        let fx = Fixture::new().await;
        fx.node.set_online(false);

        let installed = fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        let eula = fx.lifecycle.check_eula(fx.server_id).await.unwrap();
        assert!(!installed.installed);
        assert!(eula.accepted);
        assert_eq!(file_reads(&fx), 0);
    }

    #[tokio::test]
    async fn test_eula_marker() {
        let fx = Fixture::new().await;
        fx.node.put_file("eula.txt", "#By changing the setting below to TRUE\neula=false\n");
        assert!(!fx.lifecycle.check_eula(fx.server_id).await.unwrap().accepted);

        let other = Fixture::new().await;
        other.node.put_file("eula.txt", "eula=true\n");
        assert!(other.lifecycle.check_eula(other.server_id).await.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_marker_heals_provision_state() {
        let fx = Fixture::with(|s| s.provision = ProvisionState::Installing).await;
        fx.node.put_file("install.log", "Installed: true");
        fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        assert_eq!(fx.server().await.provision, ProvisionState::Installed);

        let drifted = Fixture::new().await;
        drifted.lifecycle.check_installed(drifted.server_id).await.unwrap();
        assert_eq!(drifted.server().await.provision, ProvisionState::Installing);
    }

    #[tokio::test]
    async fn test_queued_server_is_not_touched() {
        let fx = Fixture::with(|s| s.provision = ProvisionState::Queued).await;
        fx.node.put_file("install.log", "Installed: true");
        fx.lifecycle.check_installed(fx.server_id).await.unwrap();
        assert_eq!(fx.server().await.provision, ProvisionState::Queued);
    }
}
