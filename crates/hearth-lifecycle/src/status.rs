//! Status resolution.
//!
//! The daemon only knows whether a container is running. Whether the game has
//! finished booting is inferred from the image's startup-line regex, and
//! whether it is shutting down from the local stopping intent.

use crate::{Lifecycle, ServerTarget};
use chrono::{DateTime, Utc};
use hearth_proto::ServerStatus;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Compiled startup-line patterns keyed by their source. Invalid patterns are
/// remembered as `None` so they are reported once.
#[derive(Default)]
pub struct StartupPatterns {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl StartupPatterns {
    pub fn get(&self, pattern: &str) -> Option<Regex> {
        let mut compiled = self.compiled.lock();
        if let Some(entry) = compiled.get(pattern) {
            return entry.clone();
        }
        let entry = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern, error = %e, "invalid startup-line regex");
                None
            }
        };
        compiled.insert(pattern.to_string(), entry.clone());
        entry
    }
}

/// True if any log line matches.
pub fn matches_startup_line(pattern: &Regex, logs: &str) -> bool {
    logs.lines().any(|line| pattern.is_match(line))
}

impl Lifecycle {
    /// Resolve the status of one container. Never fails: anything the daemon
    /// cannot answer degrades to stopped or, for secondary calls, to online.
    pub async fn resolve_status(&self, target: &ServerTarget) -> ServerStatus {
        let node = &self.inner.node;
        let container = match node.container_status(&target.node, target.id).await {
            Ok(c) if c.running => c,
            Ok(_) => return ServerStatus::stopped(),
            Err(e) => {
                debug!(server = %target.id, node = %target.node, error = %e, "container status unavailable");
                return ServerStatus::stopped();
            }
        };

        if self.inner.intents.is_stopping(target.id) {
            return ServerStatus::stopping();
        }

        let started_at = container
            .started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let uptime = started_at
            .map(|t| (self.inner.clock.now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);

        let online = self.boot_finished(target).await;
        ServerStatus {
            online,
            starting: !online,
            stopping: false,
            uptime,
            started_at,
        }
    }

    /// Whether a running container's application finished booting. Fails
    /// open whenever a secondary call or the pattern itself is unusable.
    async fn boot_finished(&self, target: &ServerTarget) -> bool {
        let node = &self.inner.node;
        let info = match node.image_info(&target.node, target.id).await {
            Ok(info) => info,
            Err(e) => {
                debug!(server = %target.id, error = %e, "image info unavailable, assuming booted");
                return true;
            }
        };
        let Some(line) = info.startup_line else {
            return true;
        };
        let Some(pattern) = self.inner.patterns.get(&line.regex) else {
            return true;
        };

        match node.logs(&target.node, target.id, self.inner.config.log_tail).await {
            Ok(logs) => matches_startup_line(&pattern, &logs),
            Err(e) => {
                debug!(server = %target.id, error = %e, "logs unavailable, assuming booted");
                true
            }
        }
    }
}
