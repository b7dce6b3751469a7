//! Work that follows a committed metadata change.
//!
//! None of it can undo the change: a task that fails is logged and retried in the background
//! with a linearly growing backoff.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;

use crate::collaborators::CollaboratorError;
use crate::collaborators::Collaborators;
use crate::collaborators::SearchFieldSpec;

#[derive(Debug, Clone)]
pub enum PostCommitTask {
    CreateSearchField {
        object: Arc<ObjectMetadata>,
    },
    UpdateSearchField {
        workspace_id: WorkspaceId,
        object_id: ObjectId,
        fields: Vec<SearchFieldSpec>,
    },
    CreateDefaultRecords {
        object: Arc<ObjectMetadata>,
    },
    UpdateViews {
        object: Arc<ObjectMetadata>,
    },
    DeleteViews {
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    },
    InvalidatePermissions {
        workspace_id: WorkspaceId,
        version: MetadataVersion,
    },
}

impl PostCommitTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSearchField { .. } => "create_search_field",
            Self::UpdateSearchField { .. } => "update_search_field",
            Self::CreateDefaultRecords { .. } => "create_default_records",
            Self::UpdateViews { .. } => "update_views",
            Self::DeleteViews { .. } => "delete_views",
            Self::InvalidatePermissions { .. } => "invalidate_permissions",
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        match self {
            Self::CreateSearchField { object }
            | Self::CreateDefaultRecords { object }
            | Self::UpdateViews { object } => object.workspace_id,
            Self::UpdateSearchField { workspace_id, .. }
            | Self::DeleteViews { workspace_id, .. }
            | Self::InvalidatePermissions { workspace_id, .. } => *workspace_id,
        }
    }

    async fn run(&self, collaborators: &Collaborators) -> Result<(), CollaboratorError> {
        match self {
            Self::CreateSearchField { object } => {
                collaborators.search_index.create_search_field(object).await
            }
            Self::UpdateSearchField {
                workspace_id,
                object_id,
                fields,
            } => {
                collaborators
                    .search_index
                    .update_search_field(*workspace_id, *object_id, fields)
                    .await
            }
            Self::CreateDefaultRecords { object } => {
                collaborators
                    .related_records
                    .create_default_records(object)
                    .await
            }
            Self::UpdateViews { object } => collaborators.related_records.update_views(object).await,
            Self::DeleteViews {
                workspace_id,
                object_id,
            } => {
                collaborators
                    .related_records
                    .delete_views(*workspace_id, *object_id)
                    .await
            }
            Self::InvalidatePermissions {
                workspace_id,
                version,
            } => {
                collaborators
                    .permissions
                    .invalidate(*workspace_id, *version)
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per task, counting the first one made inline.
    pub max_attempts: u32,
    /// Delay before the second attempt; the n-th retry waits n times as long.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }
}

/// Runs [`PostCommitTask`]s in the background, retrying the ones that fail.
///
/// Every task gets its own tracked task, so a slow or hung collaborator holds up neither the
/// mutation that submitted it nor the other tasks.
#[derive(Debug)]
pub struct PostCommitQueue {
    collaborators: Collaborators,
    policy: RetryPolicy,
    pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl PostCommitQueue {
    pub fn new(collaborators: Collaborators, policy: RetryPolicy) -> Self {
        Self {
            collaborators,
            policy,
            pending: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Start the tasks. Must be called from within a tokio runtime.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = PostCommitTask>) {
        for task in tasks {
            self.submit(task);
        }
    }

    pub fn submit(&self, task: PostCommitTask) {
        if self.shutdown.is_cancelled() {
            warn!(
                workspace_id = %task.workspace_id(),
                task = task.name(),
                "post-commit queue is shut down, dropping task"
            );
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        let collaborators = self.collaborators.clone();
        let policy = self.policy;
        let pending = Arc::clone(&self.pending);
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            run_with_retries(&task, &collaborators, policy, &shutdown).await;
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Tasks that have not yet succeeded or given up.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every submitted task succeeded or gave up.
    pub async fn drained(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop retrying, abandon tasks that are still running and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

async fn run_with_retries(
    task: &PostCommitTask,
    collaborators: &Collaborators,
    policy: RetryPolicy,
    shutdown: &CancellationToken,
) {
    let workspace_id = task.workspace_id();
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(%workspace_id, task = task.name(), attempt, "post-commit task abandoned");
                return;
            }
            result = task.run(collaborators) => result,
        };
        match result {
            Ok(()) if attempt == 1 => {
                debug!(%workspace_id, task = task.name(), "post-commit task done");
                return;
            }
            Ok(()) => {
                info!(
                    %workspace_id,
                    task = task.name(),
                    attempt,
                    "post-commit task succeeded on retry"
                );
                return;
            }
            Err(e) if attempt >= policy.max_attempts => {
                error!(
                    %workspace_id,
                    task = task.name(),
                    attempts = attempt,
                    error = %e,
                    "post-commit task failed permanently"
                );
                return;
            }
            Err(e) => warn!(
                %workspace_id,
                task = task.name(),
                attempt,
                error = %e,
                "post-commit task failed, retrying"
            ),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(policy.backoff * attempt) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PermissionsCacheInvalidator;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` calls.
    #[derive(Debug, Default)]
    struct FlakyPermissions {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PermissionsCacheInvalidator for FlakyPermissions {
        async fn invalidate(
            &self,
            _workspace_id: WorkspaceId,
            _version: MetadataVersion,
        ) -> Result<(), CollaboratorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(anyhow::anyhow!("permissions cache unavailable").into());
            }
            Ok(())
        }
    }

    fn queue_with(permissions: &Arc<FlakyPermissions>, max_attempts: u32) -> PostCommitQueue {
        let collaborators = Collaborators {
            permissions: Arc::clone(permissions) as _,
            ..Collaborators::noop()
        };
        PostCommitQueue::new(
            collaborators,
            RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(1),
            },
        )
    }

    fn invalidate() -> PostCommitTask {
        PostCommitTask::InvalidatePermissions {
            workspace_id: WorkspaceId::new(),
            version: MetadataVersion::new(1),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_task_is_retried() {
        let permissions = Arc::new(FlakyPermissions {
            failures: 2,
            ..Default::default()
        });
        let queue = queue_with(&permissions, 5);

        queue.submit(invalidate());
        queue.drained().await;
        assert_eq!(permissions.calls.load(Ordering::SeqCst), 3);
        queue.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_retries_stop_at_max_attempts() {
        let permissions = Arc::new(FlakyPermissions {
            failures: u32::MAX,
            ..Default::default()
        });
        let queue = queue_with(&permissions, 3);

        queue.submit(invalidate());
        queue.drained().await;
        assert_eq!(permissions.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending(), 0);
        queue.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_successful_tasks_run_once() {
        let permissions = Arc::new(FlakyPermissions::default());
        let queue = queue_with(&permissions, 3);

        queue.submit_all(vec![invalidate(), invalidate()]);
        queue.drained().await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(permissions.calls.load(Ordering::SeqCst), 2);
        queue.shutdown().await;
    }

    /// Never answers for version 1.
    #[derive(Debug, Default)]
    struct StuckPermissions {
        answered: AtomicU32,
    }

    #[async_trait]
    impl PermissionsCacheInvalidator for StuckPermissions {
        async fn invalidate(
            &self,
            _workspace_id: WorkspaceId,
            version: MetadataVersion,
        ) -> Result<(), CollaboratorError> {
            if version == MetadataVersion::new(1) {
                std::future::pending::<()>().await;
            }
            self.answered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_stuck_task_does_not_hold_up_others() {
        let permissions = Arc::new(StuckPermissions::default());
        let queue = PostCommitQueue::new(
            Collaborators {
                permissions: Arc::clone(&permissions) as _,
                ..Collaborators::noop()
            },
            RetryPolicy::default(),
        );
        let workspace_id = WorkspaceId::new();

        queue.submit_all((1..=3).map(|version| PostCommitTask::InvalidatePermissions {
            workspace_id,
            version: MetadataVersion::new(version),
        }));
        tokio::time::timeout(Duration::from_secs(5), async {
            while permissions.answered.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("tasks behind the stuck one never ran");
        assert_eq!(queue.pending(), 1);

        queue.shutdown().await;
        assert_eq!(queue.pending(), 0);
    }
}
