//! World directory classification

use crate::error::LifecycleResult;
use crate::{Lifecycle, ServerTarget};
use futures_util::future::join_all;
use hearth_proto::DirEntry;
use tracing::debug;
use uuid::Uuid;

const SERVER_ROOT: &str = "/";

impl Lifecycle {
    /// Whether `folder`, directly under the server root, holds a game world.
    /// Denied names are rejected without touching the node; listing failures
    /// classify as not a world.
    pub async fn is_world(&self, folder: &str, target: &ServerTarget) -> bool {
        let rules = &self.inner.config.worlds;
        if folder.is_empty()
            || folder.starts_with('.')
            || rules.denied.iter().any(|d| d.eq_ignore_ascii_case(folder))
        {
            return false;
        }

        let path = format!("{SERVER_ROOT}{folder}");
        let entries = match self.inner.node.list_dir(&target.node, target.id, &path).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(server = %target.id, folder, error = %e, "listing failed, not a world");
                return false;
            }
        };
        looks_like_world(&entries, &rules.required, &rules.artifacts)
    }

    /// Names of the world folders in the server root.
    pub async fn list_worlds(&self, id: Uuid) -> LifecycleResult<Vec<String>> {
        let (_, target) = self.target(id).await?;
        let entries = self
            .inner
            .node
            .list_dir(&target.node, target.id, SERVER_ROOT)
            .await?;

        let candidates: Vec<String> = entries
            .into_iter()
            .filter(|e| e.is_directory != Some(false))
            .map(|e| e.name)
            .collect();
        let verdicts = join_all(candidates.iter().map(|name| self.is_world(name, &target))).await;

        Ok(candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(name, world)| world.then_some(name))
            .collect())
    }
}

/// All required files present, plus either more than one entry or a known
/// world artifact.
pub fn looks_like_world(entries: &[DirEntry], required: &[String], artifacts: &[String]) -> bool {
    let has = |name: &String| entries.iter().any(|e| &e.name == name);
    required.iter().all(has) && (entries.len() > 1 || artifacts.iter().any(has))
}
