//! The interface to wherever catalog rows are persisted.

use async_trait::async_trait;
use wsmeta_id::FieldId;
use wsmeta_id::IndexId;
use wsmeta_id::ObjectId;
use wsmeta_id::RelationId;
use wsmeta_id::WorkspaceId;

use crate::CatalogRevision;
use crate::Result;
use crate::model::FieldMetadata;
use crate::model::IndexMetadata;
use crate::model::ObjectMetadata;
use crate::model::RelationMetadata;

/// All rows of one workspace, as read at one [`CatalogRevision`].
#[derive(Debug, Clone, Default)]
pub struct WorkspaceRows {
    pub revision: CatalogRevision,
    /// Objects with their fields attached.
    pub objects: Vec<ObjectMetadata>,
    pub relations: Vec<RelationMetadata>,
    pub indexes: Vec<IndexMetadata>,
}

/// A single write against the catalog rows of a workspace.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogOp {
    /// Insert or replace an object row together with the fields it carries.
    SaveObject(ObjectMetadata),
    /// Insert or replace field rows of objects that are not otherwise written by the batch.
    SaveFields(Vec<FieldMetadata>),
    /// Remove field rows by id. Ids that are not present are ignored.
    DeleteFields(Vec<FieldId>),
    /// Remove an object row and every field row it owns.
    DeleteObject(ObjectId),
    SaveRelations(Vec<RelationMetadata>),
    DeleteRelations(Vec<RelationId>),
    SaveIndexes(Vec<IndexMetadata>),
    DeleteIndexes(Vec<IndexId>),
}

/// A set of [`CatalogOp`]s applied atomically, provided the workspace's rows are still at
/// `expected_revision`.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogBatch {
    pub workspace_id: WorkspaceId,
    pub expected_revision: CatalogRevision,
    pub ops: Vec<CatalogOp>,
}

impl CatalogBatch {
    pub fn new(workspace_id: WorkspaceId, expected_revision: CatalogRevision) -> Self {
        Self {
            workspace_id,
            expected_revision,
            ops: vec![],
        }
    }

    pub fn push(&mut self, op: CatalogOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Typed access to the persisted catalog rows.
///
/// Implementations must apply a [`CatalogBatch`] atomically and must reject it with
/// [`CatalogError::ConcurrentModification`](crate::CatalogError::ConcurrentModification) if the
/// workspace's revision is not the one the batch expects.
#[async_trait]
pub trait MetadataStore: std::fmt::Debug + Send + Sync + 'static {
    /// Read every row of a workspace. Unknown workspaces have no rows at revision zero.
    async fn load_workspace(&self, workspace_id: WorkspaceId) -> Result<WorkspaceRows>;

    /// Read a single object with its fields.
    async fn get_object(
        &self,
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    ) -> Result<Option<ObjectMetadata>>;

    /// Apply a batch, returning the workspace's new revision.
    async fn commit(&self, batch: CatalogBatch) -> Result<CatalogRevision>;

    /// Remove every row of a workspace, returning the workspace's new revision.
    async fn delete_workspace(&self, workspace_id: WorkspaceId) -> Result<CatalogRevision>;
}
