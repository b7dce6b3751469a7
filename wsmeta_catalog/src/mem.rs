//! An in-memory [`MetadataStore`], for tests and for running without a database.

use async_trait::async_trait;
use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;
use wsmeta_id::FieldId;
use wsmeta_id::IndexId;
use wsmeta_id::ObjectId;
use wsmeta_id::RelationId;
use wsmeta_id::WorkspaceId;

use crate::CatalogError;
use crate::CatalogRevision;
use crate::Result;
use crate::model::FieldMetadata;
use crate::model::IndexMetadata;
use crate::model::ObjectMetadata;
use crate::model::RelationMetadata;
use crate::store::CatalogBatch;
use crate::store::CatalogOp;
use crate::store::MetadataStore;
use crate::store::WorkspaceRows;

#[derive(Default)]
pub struct MemMetadataStore {
    workspaces: Mutex<HashMap<WorkspaceId, MemWorkspace>>,
}

impl MemMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemMetadataStore")
            .field("workspaces", &self.workspaces.lock().len())
            .finish_non_exhaustive()
    }
}

/// Rows are kept in tables the way a relational store would keep them; fields are attached
/// to their objects on read.
#[derive(Debug, Clone, Default)]
struct MemWorkspace {
    revision: CatalogRevision,
    objects: IndexMap<ObjectId, ObjectMetadata>,
    fields: IndexMap<FieldId, FieldMetadata>,
    relations: IndexMap<RelationId, RelationMetadata>,
    indexes: IndexMap<IndexId, IndexMetadata>,
}

impl MemWorkspace {
    fn assemble(&self, object: &ObjectMetadata) -> ObjectMetadata {
        let mut object = object.clone();
        object.fields = self
            .fields
            .values()
            .filter(|f| f.object_id == object.id)
            .map(|f| (f.id, f.clone()))
            .collect();
        object
    }

    fn rows(&self) -> WorkspaceRows {
        WorkspaceRows {
            revision: self.revision,
            objects: self.objects.values().map(|o| self.assemble(o)).collect(),
            relations: self.relations.values().cloned().collect(),
            indexes: self.indexes.values().cloned().collect(),
        }
    }

    fn apply(&mut self, workspace_id: WorkspaceId, op: CatalogOp) -> Result<()> {
        let same_workspace = |found: WorkspaceId| {
            if found == workspace_id {
                Ok(())
            } else {
                Err(CatalogError::CrossWorkspaceReference {
                    expected: workspace_id,
                    found,
                })
            }
        };

        match op {
            CatalogOp::SaveObject(object) => {
                same_workspace(object.workspace_id)?;
                for field in object.fields.values() {
                    same_workspace(field.workspace_id)?;
                    if field.object_id != object.id {
                        return Err(CatalogError::OrphanedField {
                            field_id: field.id,
                            object_id: field.object_id,
                        });
                    }
                }
                self.fields
                    .retain(|id, f| f.object_id != object.id || object.fields.contains_key(id));
                for field in object.fields.values() {
                    self.fields.insert(field.id, field.clone());
                }
                self.objects.insert(object.id, object.without_fields());
            }
            CatalogOp::SaveFields(fields) => {
                for field in fields {
                    same_workspace(field.workspace_id)?;
                    if !self.objects.contains_key(&field.object_id) {
                        return Err(CatalogError::OrphanedField {
                            field_id: field.id,
                            object_id: field.object_id,
                        });
                    }
                    self.fields.insert(field.id, field);
                }
            }
            CatalogOp::DeleteFields(ids) => {
                for id in ids {
                    self.fields.shift_remove(&id);
                }
            }
            CatalogOp::DeleteObject(object_id) => {
                if self.objects.shift_remove(&object_id).is_none() {
                    return Err(CatalogError::ObjectNotFound {
                        workspace_id,
                        object_id,
                    });
                }
                self.fields.retain(|_, f| f.object_id != object_id);
            }
            CatalogOp::SaveRelations(relations) => {
                for relation in relations {
                    same_workspace(relation.workspace_id)?;
                    self.relations.insert(relation.id, relation);
                }
            }
            CatalogOp::DeleteRelations(ids) => {
                for id in ids {
                    self.relations.shift_remove(&id);
                }
            }
            CatalogOp::SaveIndexes(indexes) => {
                for index in indexes {
                    same_workspace(index.workspace_id)?;
                    self.indexes.insert(index.id, index);
                }
            }
            CatalogOp::DeleteIndexes(ids) => {
                for id in ids {
                    self.indexes.shift_remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemMetadataStore {
    async fn load_workspace(&self, workspace_id: WorkspaceId) -> Result<WorkspaceRows> {
        Ok(self
            .workspaces
            .lock()
            .get(&workspace_id)
            .map(MemWorkspace::rows)
            .unwrap_or_default())
    }

    async fn get_object(
        &self,
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    ) -> Result<Option<ObjectMetadata>> {
        let workspaces = self.workspaces.lock();
        Ok(workspaces.get(&workspace_id).and_then(|ws| {
            ws.objects
                .get(&object_id)
                .map(|object| ws.assemble(object))
        }))
    }

    async fn commit(&self, batch: CatalogBatch) -> Result<CatalogRevision> {
        let mut workspaces = self.workspaces.lock();
        let mut staged = workspaces
            .get(&batch.workspace_id)
            .cloned()
            .unwrap_or_default();
        if staged.revision != batch.expected_revision {
            return Err(CatalogError::ConcurrentModification {
                workspace_id: batch.workspace_id,
                expected: batch.expected_revision,
                actual: staged.revision,
            });
        }

        let op_count = batch.ops.len();
        for op in batch.ops {
            staged.apply(batch.workspace_id, op)?;
        }
        staged.revision = staged.revision.next();
        let revision = staged.revision;
        workspaces.insert(batch.workspace_id, staged);
        debug!(workspace_id = %batch.workspace_id, %revision, op_count, "committed catalog batch");
        Ok(revision)
    }

    async fn delete_workspace(&self, workspace_id: WorkspaceId) -> Result<CatalogRevision> {
        let mut workspaces = self.workspaces.lock();
        let revision = workspaces
            .get(&workspace_id)
            .map(|ws| ws.revision)
            .unwrap_or_default()
            .next();
        workspaces.insert(
            workspace_id,
            MemWorkspace {
                revision,
                ..Default::default()
            },
        );
        Ok(revision)
    }
}
