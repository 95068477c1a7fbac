//! Panel configuration

use hearth_lifecycle::LifecycleConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CtlError, CtlResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Directory holding the JSON data store snapshots.
    pub state_path: PathBuf,

    /// Orchestration settings; every field has a default.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl PanelConfig {
    pub fn load(path: &Path) -> CtlResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CtlError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| CtlError::Config(format!("parse {}: {e}", path.display())))?;
        config
            .lifecycle
            .validate()
            .map_err(|e| CtlError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> CtlResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("/var/lib/hearth"),
            lifecycle: LifecycleConfig::default(),
        }
    }
}
