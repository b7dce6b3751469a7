use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;
use wsmeta_id::WorkspaceId;

use crate::error::MetadataError;
use crate::error::Result;

/// One mutex per workspace, serializing metadata mutations within it.
#[derive(Debug, Default)]
pub struct WorkspaceLocks {
    locks: DashMap<WorkspaceId, Arc<Mutex<()>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        workspace_id: WorkspaceId,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = Arc::clone(self.locks.entry(workspace_id).or_default().value());
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                warn!(%workspace_id, ?timeout, "timed out waiting for workspace metadata lock");
                MetadataError::LockTimeout {
                    workspace_id,
                    timeout,
                }
            })
    }

    /// Forget the workspace's lock if nobody holds or waits for it.
    pub fn remove_idle(&self, workspace_id: WorkspaceId) {
        self.locks
            .remove_if(&workspace_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
