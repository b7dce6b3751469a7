use async_trait::async_trait;
use dashmap::DashMap;
use wsmeta_id::WorkspaceId;

use crate::MetadataVersion;
use crate::Result;

/// Source of truth for the metadata version of each workspace.
#[async_trait]
pub trait VersionManager: std::fmt::Debug + Send + Sync + 'static {
    /// The current version. Workspaces that were never bumped are at the default version.
    async fn current(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion>;

    /// Atomically increment the version and return the new value.
    async fn bump(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion>;
}

#[derive(Debug, Default)]
pub struct InMemoryVersionManager {
    versions: DashMap<WorkspaceId, MetadataVersion>,
}

impl InMemoryVersionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionManager for InMemoryVersionManager {
    async fn current(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion> {
        Ok(self
            .versions
            .get(&workspace_id)
            .map(|v| *v.value())
            .unwrap_or_default())
    }

    async fn bump(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion> {
        let mut version = self.versions.entry(workspace_id).or_default();
        *version = version.next();
        Ok(*version)
    }
}
