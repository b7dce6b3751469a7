//! The workspace metadata catalog: object, field, relation and index rows per workspace, the
//! immutable snapshots that are served to readers, and the per-workspace metadata version that
//! is used to invalidate them.

use serde::Deserialize;
use serde::Serialize;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;

pub mod mem;
pub mod model;
pub mod snapshot;
pub mod store;
pub mod validate;
pub mod version;

pub use model::*;
pub use snapshot::MetadataSnapshot;
pub use snapshot::SnapshotCache;
pub use store::CatalogBatch;
pub use store::CatalogOp;
pub use store::MetadataStore;
pub use store::WorkspaceRows;
pub use version::InMemoryVersionManager;
pub use version::VersionManager;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(
        "metadata of workspace {workspace_id} was modified concurrently: expected revision {expected}, found {actual}"
    )]
    ConcurrentModification {
        workspace_id: WorkspaceId,
        expected: CatalogRevision,
        actual: CatalogRevision,
    },

    #[error("object {object_id} not found in workspace {workspace_id}")]
    ObjectNotFound {
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    },

    #[error("field {field_id} references object {object_id} which is not in the catalog")]
    OrphanedField {
        field_id: FieldId,
        object_id: ObjectId,
    },

    #[error("row belongs to workspace {found} but was written to workspace {expected}")]
    CrossWorkspaceReference {
        expected: WorkspaceId,
        found: WorkspaceId,
    },

    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

/// The metadata version of a workspace.
///
/// Bumped once for every successful mutation of the workspace's metadata. Caches keyed on it
/// consider themselves stale as soon as the current version differs from the one they were
/// built at.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MetadataVersion(u64);

impl MetadataVersion {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The revision of a workspace's rows in a [`MetadataStore`].
///
/// Incremented by the store on every committed [`CatalogBatch`]. A batch carries the revision
/// it was planned against and is rejected if the rows moved on in the meantime.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CatalogRevision(u64);

impl CatalogRevision {
    pub fn new(revision: u64) -> Self {
        Self(revision)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CatalogRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Limits on the size of a workspace's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogLimits {
    pub max_objects_per_workspace: usize,
    pub max_fields_per_object: usize,
}

impl CatalogLimits {
    pub const DEFAULT_MAX_OBJECTS_PER_WORKSPACE: usize = 1_000;
    pub const DEFAULT_MAX_FIELDS_PER_OBJECT: usize = 500;
}

impl Default for CatalogLimits {
    fn default() -> Self {
        Self {
            max_objects_per_workspace: Self::DEFAULT_MAX_OBJECTS_PER_WORKSPACE,
            max_fields_per_object: Self::DEFAULT_MAX_FIELDS_PER_OBJECT,
        }
    }
}
