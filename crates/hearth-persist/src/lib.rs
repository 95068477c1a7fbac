//! JSON snapshot persistence for Hearth panel records.
//!
//! [`JsonStore`] keeps one collection per file at `{root}/state/{collection}.json`.
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

#![forbid(unsafe_code)]

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(root: &Path, collection: &str) -> Self {
        let path = root.join("state").join(format!("{collection}.json"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the collection. A missing or unreadable snapshot yields an empty map.
    pub fn load<T: DeserializeOwned>(&self) -> BTreeMap<String, T> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot, starting empty");
                return BTreeMap::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable snapshot, starting empty");
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "corrupt snapshot, starting empty");
            BTreeMap::new()
        })
    }

    /// Replace the snapshot with `records`.
    pub fn save<T: Serialize>(&self, records: &BTreeMap<String, T>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(records).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}
