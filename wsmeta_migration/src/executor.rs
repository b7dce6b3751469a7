use async_trait::async_trait;

use crate::step::AppliedSteps;
use crate::step::MigrationPlan;
use crate::step::MigrationStep;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaExecutionError {
    #[error("migration step {index} ({step}) failed: {reason}")]
    StepFailed {
        index: usize,
        step: Box<MigrationStep>,
        reason: String,
    },

    #[error("physical schema is unavailable: {0}")]
    Unavailable(String),
}

/// Applies [`MigrationPlan`]s to a workspace's physical schema.
///
/// Implementations apply a plan as a unit: either every step is committed, or none is and the
/// error names the step that failed.
#[async_trait]
pub trait PhysicalSchemaExecutor: std::fmt::Debug + Send + Sync + 'static {
    async fn execute(&self, plan: &MigrationPlan) -> Result<AppliedSteps, SchemaExecutionError>;
}
