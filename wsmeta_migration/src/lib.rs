//! Turning metadata changes into physical schema changes.
//!
//! The [`RelationManager`] works out what happens to relations when an object is created,
//! renamed or deleted, the [`MigrationPlanner`] turns that into an ordered [`MigrationPlan`],
//! and the [`MigrationRunner`] applies the plan through a [`PhysicalSchemaExecutor`].

use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;

pub mod column;
pub mod executor;
pub mod mem;
pub mod planner;
pub mod relation;
pub mod runner;
pub mod step;

#[cfg(test)]
mod test_util;

pub use executor::PhysicalSchemaExecutor;
pub use executor::SchemaExecutionError;
pub use mem::InMemorySchemaExecutor;
pub use mem::PhysicalSchema;
pub use planner::MigrationPlanner;
pub use planner::PlanEffects;
pub use planner::PlannedMigration;
pub use relation::RelationDelta;
pub use relation::RelationManager;
pub use runner::MigrationRunError;
pub use runner::MigrationRunner;
pub use runner::RunReport;
pub use runner::RunState;
pub use step::AppliedSteps;
pub use step::ColumnDefinition;
pub use step::ColumnType;
pub use step::ForeignKey;
pub use step::IndexDefinition;
pub use step::MigrationPlan;
pub use step::MigrationStep;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("target table \"{table}\" is already used by object {existing_object_id}")]
    TargetTableCollision {
        table: String,
        existing_object_id: ObjectId,
    },

    #[error("relation field {field_id} points at field {target_field_id} which does not exist")]
    DanglingRelation {
        field_id: FieldId,
        target_field_id: FieldId,
    },

    #[error("object \"{object}\" already has a field named \"{field}\"")]
    FieldNameCollision { object: String, field: String },

    #[error("nothing to plan: neither a current nor a proposed object was given")]
    NothingToPlan,

    #[error("migration step {index} ({step}) runs before something it depends on")]
    OrderViolation { index: usize, step: String },
}

pub type Result<T, E = PlanningError> = std::result::Result<T, E>;
