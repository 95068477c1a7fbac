//! Lifecycle configuration

use hearth_daemon::ClientConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Node client identity and per-endpoint timeouts.
    #[serde(default)]
    pub daemon: ClientConfig,

    /// How long a requested stop overrides the daemon's `running` flag.
    #[serde(default = "default_stopping_intent_secs")]
    pub stopping_intent_secs: u64,

    /// Validity of cached install/EULA marker checks.
    #[serde(default = "default_marker_cache_secs")]
    pub marker_cache_secs: u64,

    /// Pause between tearing a container down and bringing it back.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Log lines scanned for the startup-line regex.
    #[serde(default = "default_log_tail")]
    pub log_tail: u32,

    /// Sent when an image declares no stop command.
    #[serde(default = "default_stop_command")]
    pub default_stop_command: String,

    /// Sweep interval for expired stopping intents.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    #[serde(default)]
    pub markers: MarkerFiles,

    #[serde(default)]
    pub worlds: WorldRules,
}

fn default_stopping_intent_secs() -> u64 {
    120
}

fn default_marker_cache_secs() -> u64 {
    10
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

fn default_log_tail() -> u32 {
    100
}

fn default_stop_command() -> String {
    "stop".to_string()
}

fn default_reaper_interval_secs() -> u64 {
    30
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            daemon: ClientConfig::default(),
            stopping_intent_secs: default_stopping_intent_secs(),
            marker_cache_secs: default_marker_cache_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            log_tail: default_log_tail(),
            default_stop_command: default_stop_command(),
            reaper_interval_secs: default_reaper_interval_secs(),
            markers: MarkerFiles::default(),
            worlds: WorldRules::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Clamped to [`MAX_HINT_SECS`].
    pub fn stopping_intent_ttl(&self) -> chrono::Duration {
        hint_ttl(self.stopping_intent_secs)
    }

    /// Clamped to [`MAX_HINT_SECS`].
    pub fn marker_cache_ttl(&self) -> chrono::Duration {
        hint_ttl(self.marker_cache_secs)
    }

    /// Reject values that cannot be honoured as written.
    pub fn validate(&self) -> Result<(), String> {
        for (name, secs) in [
            ("stopping_intent_secs", self.stopping_intent_secs),
            ("marker_cache_secs", self.marker_cache_secs),
        ] {
            if secs > MAX_HINT_SECS {
                return Err(format!("{name} must be at most {MAX_HINT_SECS}, got {secs}"));
            }
        }
        if self.reaper_interval_secs == 0 {
            return Err("reaper_interval_secs must be positive".to_string());
        }
        Ok(())
    }
}

/// Longest lifetime of a process-local hint (one day).
pub const MAX_HINT_SECS: u64 = 86_400;

fn hint_ttl(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_HINT_SECS)).unwrap_or_default();
    chrono::Duration::try_seconds(secs).unwrap_or_default()
}

/// Daemon-hosted files whose content signals provisioning progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerFiles {
    pub install_path: String,
    pub install_literal: String,
    pub eula_path: String,
    pub eula_literal: String,
}

impl Default for MarkerFiles {
    fn default() -> Self {
        Self {
            install_path: "install.log".to_string(),
            install_literal: "Installed: true".to_string(),
            eula_path: "eula.txt".to_string(),
            eula_literal: "eula=true".to_string(),
        }
    }
}

/// Heuristics for telling a world directory apart from other folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldRules {
    /// Folder names that are never worlds.
    pub denied: Vec<String>,
    /// Files every world contains.
    pub required: Vec<String>,
    /// Entries commonly found next to the required files.
    pub artifacts: Vec<String>,
}

impl Default for WorldRules {
    fn default() -> Self {
        let list = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            denied: list(&[
                "plugins",
                "config",
                "mods",
                "logs",
                "cache",
                "libraries",
                "crash-reports",
                "versions",
                "bundler",
                "debug",
                "defaultconfigs",
                "kubejs",
                "scripts",
                "resourcepacks",
            ]),
            required: list(&["level.dat"]),
            artifacts: list(&[
                "region",
                "playerdata",
                "session.lock",
                "data",
                "DIM1",
                "DIM-1",
                "level.dat_old",
                "stats",
                "advancements",
                "entities",
                "poi",
            ]),
        }
    }
}
