use std::time::Duration;

use tokio::task::JoinError;
use wsmeta_catalog::CatalogError;
use wsmeta_catalog::CatalogRevision;
use wsmeta_catalog::validate::ValidationError;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;
use wsmeta_migration::MigrationRunError;
use wsmeta_migration::PlanningError;
use wsmeta_migration::SchemaExecutionError;

use crate::collaborators::CollaboratorError;

/// Coarse classification of [`MetadataError`]s, for whatever sits at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("object {object_id} not found in workspace {workspace_id}")]
    NotFound {
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    },

    #[error("could not plan schema migration: {0}")]
    Planning(#[from] PlanningError),

    #[error("schema migration failed: {0}")]
    SchemaExecution(#[from] MigrationRunError),

    #[error(
        "catalog of workspace {workspace_id} was modified concurrently \
        (expected revision {expected}, found {actual})"
    )]
    ConcurrentModification {
        workspace_id: WorkspaceId,
        expected: CatalogRevision,
        actual: CatalogRevision,
    },

    #[error("timed out after {timeout:?} waiting for the metadata lock of workspace {workspace_id}")]
    LockTimeout {
        workspace_id: WorkspaceId,
        timeout: Duration,
    },

    #[error("remote relation provider failed: {0}")]
    RemoteRelations(#[source] CollaboratorError),

    #[error("catalog error: {0}")]
    Catalog(#[source] CatalogError),

    #[error("mutation of workspace {workspace_id} was aborted: {source}")]
    Aborted {
        workspace_id: WorkspaceId,
        source: JoinError,
    },
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Planning(_) => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ConcurrentModification { .. } => ErrorKind::Conflict,
            Self::LockTimeout { .. } | Self::RemoteRelations(_) => ErrorKind::Unavailable,
            Self::SchemaExecution(MigrationRunError::Execution(
                SchemaExecutionError::Unavailable(_),
            )) => ErrorKind::Unavailable,
            Self::SchemaExecution(_) | Self::Catalog(_) | Self::Aborted { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the same call may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::LockTimeout { .. }
        )
    }
}

impl From<CatalogError> for MetadataError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::ConcurrentModification {
                workspace_id,
                expected,
                actual,
            } => Self::ConcurrentModification {
                workspace_id,
                expected,
                actual,
            },
            CatalogError::ObjectNotFound {
                workspace_id,
                object_id,
            } => Self::NotFound {
                workspace_id,
                object_id,
            },
            e => Self::Catalog(e),
        }
    }
}

pub type Result<T, E = MetadataError> = std::result::Result<T, E>;
