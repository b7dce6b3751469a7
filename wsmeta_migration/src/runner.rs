use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinError;
use tracing::error;
use tracing::info;
use wsmeta_id::WorkspaceId;

use crate::executor::PhysicalSchemaExecutor;
use crate::executor::SchemaExecutionError;
use crate::step::AppliedSteps;
use crate::step::MigrationPlan;

/// Lifecycle of one migration run. `Applied` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Pending,
    Applying,
    Applied,
    Failed,
}

impl RunState {
    fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applying)
                | (Self::Pending, Self::Applied)
                | (Self::Applying, Self::Applied)
                | (Self::Applying, Self::Failed)
        )
    }
}

#[derive(Debug)]
struct MigrationRun {
    workspace_id: WorkspaceId,
    state: RunState,
    started: Instant,
}

impl MigrationRun {
    fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            state: RunState::Pending,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: RunState) {
        assert!(
            self.state.can_move_to(next),
            "illegal migration state change {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    fn finish(mut self, applied: AppliedSteps) -> RunReport {
        self.advance(RunState::Applied);
        RunReport {
            workspace_id: self.workspace_id,
            state: self.state,
            applied,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub workspace_id: WorkspaceId,
    pub state: RunState,
    pub applied: AppliedSteps,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationRunError {
    #[error(transparent)]
    Execution(#[from] SchemaExecutionError),

    #[error("migration for workspace {workspace_id} was aborted: {source}")]
    Aborted {
        workspace_id: WorkspaceId,
        source: JoinError,
    },
}

/// Runs migration plans to completion through a [`PhysicalSchemaExecutor`].
///
/// Execution happens on its own task, so a caller that stops waiting does not leave a plan
/// half way through: the executor still finishes (or fails) the plan as a unit.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    executor: Arc<dyn PhysicalSchemaExecutor>,
}

impl MigrationRunner {
    pub fn new(executor: Arc<dyn PhysicalSchemaExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn PhysicalSchemaExecutor> {
        &self.executor
    }

    pub async fn run(&self, plan: MigrationPlan) -> Result<RunReport, MigrationRunError> {
        let workspace_id = plan.workspace_id();
        let mut run = MigrationRun::new(workspace_id);
        if plan.is_empty() {
            return Ok(run.finish(AppliedSteps::default()));
        }

        run.advance(RunState::Applying);
        let steps = plan.len();
        let executor = Arc::clone(&self.executor);
        let result = tokio::spawn(async move { executor.execute(&plan).await })
            .await
            .map_err(|source| MigrationRunError::Aborted {
                workspace_id,
                source,
            })?;

        match result {
            Ok(applied) => {
                let report = run.finish(applied);
                info!(
                    %workspace_id,
                    steps,
                    elapsed = ?report.elapsed,
                    "migration applied"
                );
                Ok(report)
            }
            Err(e) => {
                run.advance(RunState::Failed);
                error!(%workspace_id, steps, error = %e, "migration failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemorySchemaExecutor;
    use crate::step::MigrationStep;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn create_table(workspace_id: WorkspaceId) -> MigrationPlan {
        let mut plan = MigrationPlan::new(workspace_id);
        plan.push(MigrationStep::CreateTable {
            table: "_pet".to_string(),
        });
        plan
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_plan_is_applied_without_the_executor() {
        let executor = Arc::new(InMemorySchemaExecutor::new());
        let runner = MigrationRunner::new(Arc::clone(&executor) as _);
        let workspace_id = WorkspaceId::new();

        let report = runner.run(MigrationPlan::new(workspace_id)).await.unwrap();
        assert_eq!(report.state, RunState::Applied);
        assert!(report.applied.is_empty());
        assert!(executor.history(workspace_id).is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_run_reports_the_step() {
        let executor = Arc::new(InMemorySchemaExecutor::new());
        let runner = MigrationRunner::new(Arc::clone(&executor) as _);
        let workspace_id = WorkspaceId::new();
        executor.fail_at_step(workspace_id, 0);

        let err = runner.run(create_table(workspace_id)).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationRunError::Execution(SchemaExecutionError::StepFailed { index: 0, .. })
        ));
        assert!(!executor.schema(workspace_id).has_table("_pet"));
    }

    #[derive(Debug, Default)]
    struct GatedExecutor {
        inner: InMemorySchemaExecutor,
        started: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl PhysicalSchemaExecutor for GatedExecutor {
        async fn execute(
            &self,
            plan: &MigrationPlan,
        ) -> Result<AppliedSteps, SchemaExecutionError> {
            self.started.notify_one();
            self.gate.notified().await;
            self.inner.execute(plan).await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_abandoned_run_still_completes() {
        let executor = Arc::new(GatedExecutor::default());
        let runner = MigrationRunner::new(Arc::clone(&executor) as _);
        let workspace_id = WorkspaceId::new();

        let caller = tokio::spawn(async move { runner.run(create_table(workspace_id)).await });
        executor.started.notified().await;
        caller.abort();
        executor.gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), async {
            while executor.inner.history(workspace_id).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("abandoned migration never completed");
        assert!(executor.inner.schema(workspace_id).has_table("_pet"));
    }
}
