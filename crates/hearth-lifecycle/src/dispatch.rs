//! Power actions, provisioning flows and settings policy.
//!
//! Everything that changes a server's container or provisioning state for one
//! UUID runs under that server's lock, except the optimistic half of a stop:
//! the caller gets `stopping` back at once and the node call happens in the
//! background.

use crate::cache::IntentOrigin;
use crate::env::project_environment;
use crate::error::{LifecycleError, LifecycleResult};
use crate::queue::ProvisionTask;
use crate::{Lifecycle, ServerTarget};
use anyhow::Context;
use hearth_proto::{
    InstallRequest, InstallStep, PortMapping, PowerAction, ProvisionState, Server, ServerStatus,
    StartRequest, StopRequest, validate_ports,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
    Reinstall,
    Install,
    Suspend,
    Unsuspend,
    Delete,
}

impl From<PowerAction> for ActionKind {
    fn from(action: PowerAction) -> Self {
        match action {
            PowerAction::Start => Self::Start,
            PowerAction::Stop => Self::Stop,
            PowerAction::Restart => Self::Restart,
        }
    }
}

/// Result handed back to the route layer for a mutating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub server_id: Uuid,
    pub action: ActionKind,
    pub status: ServerStatus,
    pub message: String,
}

impl ActionOutcome {
    fn new(server_id: Uuid, action: ActionKind, status: ServerStatus, message: impl Into<String>) -> Self {
        Self {
            server_id,
            action,
            status,
            message: message.into(),
        }
    }
}

fn starting() -> ServerStatus {
    ServerStatus {
        starting: true,
        ..ServerStatus::default()
    }
}

impl Lifecycle {
    // ─── Power actions ───────────────────────────────────────────────────

    pub async fn apply_power_action(&self, id: Uuid, action: PowerAction) -> LifecycleResult<ActionOutcome> {
        match action {
            PowerAction::Start => self.start(id).await,
            PowerAction::Stop => self.stop(id).await,
            PowerAction::Restart => self.restart(id).await,
        }
    }

    async fn start(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        // policy first, before any node traffic or lock wait
        ensure_startable(&self.inner.store.get_server(id).await?, PowerAction::Start)?;

        let _guard = self.inner.locks.acquire(id).await;
        let (server, target) = self.target(id).await?;
        ensure_startable(&server, PowerAction::Start)?;
        self.ensure_installed(&server, PowerAction::Start).await?;

        let request = self.start_request(&server).await?;
        if !self.inner.intents.clear_settled(id) {
            debug!(server = %id, "stop still pending, it will follow this start");
        }
        self.send_start(&target, &request).await?;
        Ok(ActionOutcome::new(id, ActionKind::Start, starting(), "start requested"))
    }

    async fn stop(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        let (server, target) = self.target(id).await?;
        if !self.inner.intents.begin(id) {
            debug!(server = %id, "stop already in flight");
            return Ok(ActionOutcome::new(
                id,
                ActionKind::Stop,
                ServerStatus::stopping(),
                "stop already in progress",
            ));
        }

        let request = StopRequest {
            id,
            stop_cmd: self.stop_command(&server).await,
        };
        let this = self.clone();
        self.inner.background.spawn(async move {
            let _guard = this.inner.locks.acquire(id).await;
            // failures are logged inside; the caller already has its answer
            match this.send_stop(&target, &request).await {
                Ok(true) => this.inner.intents.settle(id),
                Ok(false) | Err(_) => this.inner.intents.expire_from(id, IntentOrigin::Stop),
            }
        });

        Ok(ActionOutcome::new(
            id,
            ActionKind::Stop,
            ServerStatus::stopping(),
            "stop requested",
        ))
    }

    async fn restart(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        ensure_startable(&self.inner.store.get_server(id).await?, PowerAction::Restart)?;

        let _guard = self.inner.locks.acquire(id).await;
        let (server, target) = self.target(id).await?;
        ensure_startable(&server, PowerAction::Restart)?;
        self.ensure_installed(&server, PowerAction::Restart).await?;

        self.inner.intents.begin_restart(id);
        let stop = StopRequest {
            id,
            stop_cmd: self.stop_command(&server).await,
        };
        if let Err(e) = self.send_stop(&target, &stop).await {
            self.inner.intents.expire_from(id, IntentOrigin::Restart);
            return Err(e);
        }
        tokio::time::sleep(self.inner.config.settle_delay()).await;

        // settings may have changed while the container went down
        let built = match self.inner.store.get_server(id).await {
            Ok(server) => self.start_request(&server).await,
            Err(e) => Err(e.into()),
        };
        self.inner.intents.expire_from(id, IntentOrigin::Restart);
        if self.inner.intents.stop_requested(id) {
            info!(server = %id, "stop requested during restart, not starting again");
            return Ok(ActionOutcome::new(
                id,
                ActionKind::Restart,
                ServerStatus::stopping(),
                "restart superseded by stop",
            ));
        }
        let request = match built {
            Ok(request) => request,
            Err(e) => {
                warn!(server = %id, error = %e, "restart aborted, server left stopped");
                return Err(e);
            }
        };
        self.send_start(&target, &request).await?;
        Ok(ActionOutcome::new(id, ActionKind::Restart, starting(), "restarted"))
    }

    /// Build the start payload. Every configuration problem surfaces here,
    /// before the node is contacted.
    pub async fn start_request(&self, server: &Server) -> LifecycleResult<StartRequest> {
        let image = self.inner.store.get_image(server.image_id).await?;
        let reference = selected_image(server)?;
        if !image.declares(reference) {
            return Err(LifecycleError::ImageNotDeclared {
                reference: reference.to_string(),
            });
        }
        validate_ports(&server.ports).map_err(LifecycleError::InvalidPorts)?;
        let env = project_environment(&server.variables)?;

        let start_command = if server.start_command.trim().is_empty() {
            image.startup.clone()
        } else {
            server.start_command.clone()
        };

        Ok(StartRequest {
            id: server.id,
            image: reference.to_string(),
            ports: server.ports.clone(),
            primary_port: server.primary_port(),
            memory: server.limits.memory_mb.saturating_mul(MIB),
            cpu: server.limits.cpu,
            env,
            start_command,
        })
    }

    async fn stop_command(&self, server: &Server) -> String {
        match self.inner.store.get_image(server.image_id).await {
            Ok(image) => image
                .stop_command
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.inner.config.default_stop_command.clone()),
            Err(e) => {
                debug!(server = %server.id, error = %e, "image unavailable, using default stop command");
                self.inner.config.default_stop_command.clone()
            }
        }
    }

    async fn send_start(&self, target: &ServerTarget, request: &StartRequest) -> LifecycleResult<()> {
        match self.inner.node.start(&target.node, request).await {
            Ok(()) => {
                info!(server = %target.id, node = %target.node, image = %request.image, "start sent");
                Ok(())
            }
            Err(e) => {
                warn!(server = %target.id, node = %target.node, error = %e, "start failed");
                Err(e.into())
            }
        }
    }

    /// Send a stop. A missing container is already stopped and yields
    /// `Ok(false)`. Callers clear their own stopping intent on anything but
    /// `Ok(true)`.
    async fn send_stop(&self, target: &ServerTarget, request: &StopRequest) -> LifecycleResult<bool> {
        match self.inner.node.stop(&target.node, request).await {
            Ok(()) => {
                info!(server = %target.id, node = %target.node, "stop sent");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(server = %target.id, "no container on node, already stopped");
                Ok(false)
            }
            Err(e) => {
                warn!(server = %target.id, node = %target.node, error = %e, "stop failed");
                Err(e.into())
            }
        }
    }

    /// An `Installing` server may already have its marker; check before
    /// refusing.
    async fn ensure_installed(&self, server: &Server, action: PowerAction) -> LifecycleResult<()> {
        if server.provision != ProvisionState::Installing {
            return Ok(());
        }
        if self.check_installed(server.id).await?.installed {
            return Ok(());
        }
        warn!(server = %server.id, %action, "rejected: install not finished");
        Err(LifecycleError::InvalidTransition {
            action: action.to_string(),
            state: ProvisionState::Installing,
        })
    }

    // ─── Provisioning ────────────────────────────────────────────────────

    /// Tear down the container and queue a fresh install with the current
    /// variables.
    pub async fn reinstall(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        let _guard = self.inner.locks.acquire(id).await;
        let (server, target) = self.target(id).await?;
        if server.suspended {
            warn!(server = %id, "rejected: reinstall of suspended server");
            return Err(LifecycleError::Suspended(id));
        }

        self.transition(&server, ProvisionState::Queued).await?;
        match self.inner.node.delete_container(&target.node, id).await {
            Ok(()) => info!(server = %id, node = %target.node, "container deleted for reinstall"),
            Err(e) if e.is_not_found() => debug!(server = %id, "no container to delete"),
            Err(e) => {
                warn!(server = %id, node = %target.node, error = %e, "delete failed, reinstall abandoned");
                if let Err(restore) = self.inner.store.set_provision_state(id, server.provision).await {
                    warn!(server = %id, error = %restore, "could not restore provision state");
                }
                return Err(e.into());
            }
        }
        self.forget_hints(id);

        tokio::time::sleep(self.inner.config.settle_delay()).await;
        let message = if self.enqueue_install(id, "reinstall") {
            "reinstall queued"
        } else {
            "install already queued"
        };
        Ok(ActionOutcome::new(id, ActionKind::Reinstall, ServerStatus::stopped(), message))
    }

    /// Queue the initial install of a new server, or after settings changed.
    pub async fn install(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        let _guard = self.inner.locks.acquire(id).await;
        let server = self.inner.store.get_server(id).await?;
        self.transition(&server, ProvisionState::Queued).await?;
        self.inner.installs.expire(id);
        let message = if self.enqueue_install(id, "install") {
            "install queued"
        } else {
            "install already queued"
        };
        Ok(ActionOutcome::new(id, ActionKind::Install, ServerStatus::stopped(), message))
    }

    /// Re-enqueue every server persisted as `Queued`. Run once at startup:
    /// the in-process queue does not survive a restart.
    pub async fn reconcile_queued(&self) -> LifecycleResult<usize> {
        let servers = self.inner.store.list_servers().await?;
        let mut resumed = 0;
        for server in servers.iter().filter(|s| s.provision.is_queued()) {
            if self.enqueue_install(server.id, "resume install") {
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(resumed, "re-enqueued interrupted installs");
        }
        Ok(resumed)
    }

    /// Enqueue the install task unless one is already waiting for this
    /// server. Returns whether a task was added.
    fn enqueue_install(&self, id: Uuid, label: &str) -> bool {
        if !self.inner.awaiting_install.insert(id) {
            debug!(server = %id, "install already queued");
            return false;
        }
        let this = self.clone();
        self.inner.queue.enqueue(ProvisionTask::new(format!("{label} {id}"), move || async move {
            this.run_install(id).await
        }));
        true
    }

    /// Queue task body. Whatever happens, the server leaves `Queued`.
    async fn run_install(&self, id: Uuid) -> anyhow::Result<()> {
        let _guard = self.inner.locks.acquire(id).await;
        self.inner.awaiting_install.remove(&id);
        let result = self.send_install(id).await;

        match self.inner.store.get_server(id).await {
            Ok(server) if server.provision.is_queued() => {
                if let Err(e) = self.transition(&server, ProvisionState::Installing).await {
                    warn!(server = %id, error = %e, "could not leave queued state");
                }
            }
            Ok(_) => {}
            Err(e) => debug!(server = %id, error = %e, "server gone before install finished"),
        }
        result
    }

    async fn send_install(&self, id: Uuid) -> anyhow::Result<()> {
        let (server, target) = self.target(id).await?;
        let image = self.inner.store.get_image(server.image_id).await?;
        let reference = selected_image(&server)?;
        let request = InstallRequest {
            id,
            image: reference.to_string(),
            env: project_environment(&server.variables)?,
            scripts: image.scripts.install.iter().map(InstallStep::from).collect(),
            native: image.scripts.native.clone(),
        };

        self.inner
            .node
            .install(&target.node, &request)
            .await
            .with_context(|| format!("install on node {}", target.node))?;
        self.inner.installs.expire(id);
        info!(server = %id, node = %target.node, scripts = request.scripts.len(), "install sent");
        Ok(())
    }

    /// Remove the container, then the record. The record stays if the node
    /// reports anything other than success or not-found.
    pub async fn delete_server(&self, id: Uuid) -> LifecycleResult<ActionOutcome> {
        let guard = self.inner.locks.acquire(id).await;
        let (_, target) = self.target(id).await?;
        match self.inner.node.delete_container(&target.node, id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(server = %id, "no container to delete"),
            Err(e) => {
                warn!(server = %id, node = %target.node, error = %e, "container teardown failed, record kept");
                return Err(e.into());
            }
        }
        self.inner.store.remove_server(id).await?;
        self.forget_hints(id);
        drop(guard);
        self.inner.locks.forget(id);

        info!(server = %id, "server deleted");
        Ok(ActionOutcome::new(
            id,
            ActionKind::Delete,
            ServerStatus::stopped(),
            "server deleted",
        ))
    }

    async fn transition(&self, server: &Server, next: ProvisionState) -> LifecycleResult<()> {
        if server.provision == next {
            return Ok(());
        }
        if !server.provision.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                action: format!("move to {next}"),
                state: server.provision,
            });
        }
        self.inner.store.set_provision_state(server.id, next).await?;
        info!(server = %server.id, from = %server.provision, to = %next, "provision state changed");
        Ok(())
    }

    fn forget_hints(&self, id: Uuid) {
        self.inner.intents.expire(id);
        self.inner.installs.expire(id);
        self.inner.eulas.expire(id);
    }

    // ─── Settings policy ─────────────────────────────────────────────────

    /// Suspending forces a stop and blocks later starts.
    pub async fn set_suspended(&self, id: Uuid, suspended: bool) -> LifecycleResult<ActionOutcome> {
        let server = self.inner.store.get_server(id).await?;
        self.inner.store.set_suspended(id, suspended).await?;
        info!(server = %id, suspended, "suspension changed");

        if !suspended {
            let status = self.server_status(id).await?;
            return Ok(ActionOutcome::new(id, ActionKind::Unsuspend, status, "server unsuspended"));
        }
        if server.provision.is_installing() {
            return Ok(ActionOutcome::new(
                id,
                ActionKind::Suspend,
                ServerStatus::stopped(),
                "server suspended",
            ));
        }
        let stopped = self.stop(id).await?;
        Ok(ActionOutcome {
            action: ActionKind::Suspend,
            message: "server suspended, stop requested".to_string(),
            ..stopped
        })
    }

    pub async fn update_startup(&self, id: Uuid, command: &str, is_admin: bool) -> LifecycleResult<()> {
        let server = self.inner.store.get_server(id).await?;
        if !(server.allow_startup_edit || is_admin) {
            warn!(server = %id, "rejected: startup edit not allowed");
            return Err(LifecycleError::StartupEditDenied);
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(LifecycleError::Invalid("startup command cannot be empty".to_string()));
        }
        self.inner.store.set_start_command(id, command.to_string()).await?;
        Ok(())
    }

    /// Select one of the container images the server's image declares.
    pub async fn select_image(&self, id: Uuid, reference: &str) -> LifecycleResult<()> {
        let server = self.inner.store.get_server(id).await?;
        let image = self.inner.store.get_image(server.image_id).await?;
        if !image.declares(reference) {
            return Err(LifecycleError::ImageNotDeclared {
                reference: reference.to_string(),
            });
        }
        self.inner.store.set_docker_image(id, reference.to_string()).await?;
        Ok(())
    }

    /// Set variable values by env name. `null` resets a variable to its
    /// default. Nothing is persisted unless every effective value coerces to
    /// its declared type.
    pub async fn update_variables(&self, id: Uuid, values: BTreeMap<String, Value>) -> LifecycleResult<()> {
        let server = self.inner.store.get_server(id).await?;
        let mut variables = server.variables;
        for (env, value) in values {
            let Some(variable) = variables.iter_mut().find(|v| v.env == env) else {
                return Err(LifecycleError::Invalid(format!("unknown variable {env}")));
            };
            variable.value = value;
        }
        project_environment(&variables)?;
        self.inner.store.set_variables(id, variables).await?;
        Ok(())
    }

    pub async fn update_ports(&self, id: Uuid, ports: Vec<PortMapping>) -> LifecycleResult<()> {
        validate_ports(&ports).map_err(LifecycleError::InvalidPorts)?;
        self.inner.store.set_ports(id, ports).await?;
        Ok(())
    }
}

fn selected_image(server: &Server) -> LifecycleResult<&str> {
    server
        .docker_image
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or(LifecycleError::MissingImage(server.id))
}

fn ensure_startable(server: &Server, action: PowerAction) -> LifecycleResult<()> {
    if server.suspended {
        warn!(server = %server.id, %action, "rejected: server suspended");
        return Err(LifecycleError::Suspended(server.id));
    }
    if server.provision.is_queued() {
        warn!(server = %server.id, %action, "rejected: install queued");
        return Err(LifecycleError::InvalidTransition {
            action: action.to_string(),
            state: ProvisionState::Queued,
        });
    }
    Ok(())
}
