//! Systems outside the metadata pipeline that follow its changes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::LabelKey;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct CollaboratorError(#[from] anyhow::Error);

pub type Result<T, E = CollaboratorError> = std::result::Result<T, E>;

/// Primary key of the table behind a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKeySettings {
    pub column_name: String,
    pub column_type: String,
}

impl Default for PrimaryKeySettings {
    fn default() -> Self {
        Self {
            column_name: "id".to_string(),
            column_type: "uuid".to_string(),
        }
    }
}

/// A field that feeds an object's search vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchFieldSpec {
    pub name: String,
    pub field_type: FieldType,
}

/// Wires remote objects, whose records live in another database, into the workspace's relations.
#[async_trait]
pub trait RemoteRelationProvider: std::fmt::Debug + Send + Sync + 'static {
    async fn create_foreign_keys(
        &self,
        object: &ObjectMetadata,
        primary_key: &PrimaryKeySettings,
    ) -> Result<()>;

    async fn delete_foreign_keys(&self, object: &ObjectMetadata) -> Result<()>;
}

#[async_trait]
pub trait SearchIndexSync: std::fmt::Debug + Send + Sync + 'static {
    /// Register the search vector of a newly created object.
    async fn create_search_field(&self, object: &ObjectMetadata) -> Result<()>;

    /// The fields feeding an object's search vector changed.
    async fn update_search_field(
        &self,
        workspace_id: WorkspaceId,
        object_id: ObjectId,
        fields: &[SearchFieldSpec],
    ) -> Result<()>;
}

/// Records that exist for every object, such as its saved views.
#[async_trait]
pub trait RelatedRecordsSync: std::fmt::Debug + Send + Sync + 'static {
    async fn create_default_records(&self, object: &ObjectMetadata) -> Result<()>;

    /// Views show their object's plural label and icon.
    async fn update_views(&self, object: &ObjectMetadata) -> Result<()>;

    async fn delete_views(&self, workspace_id: WorkspaceId, object_id: ObjectId) -> Result<()>;
}

#[async_trait]
pub trait PermissionsCacheInvalidator: std::fmt::Debug + Send + Sync + 'static {
    async fn invalidate(&self, workspace_id: WorkspaceId, version: MetadataVersion) -> Result<()>;
}

/// Translates labels of standard objects.
pub trait LabelResolver: std::fmt::Debug + Send + Sync + 'static {
    fn resolve(&self, key: LabelKey, source: &str, locale: Option<&str>) -> String;
}

/// Does nothing, successfully.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollaborator;

#[async_trait]
impl RemoteRelationProvider for NoopCollaborator {
    async fn create_foreign_keys(
        &self,
        _object: &ObjectMetadata,
        _primary_key: &PrimaryKeySettings,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_foreign_keys(&self, _object: &ObjectMetadata) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SearchIndexSync for NoopCollaborator {
    async fn create_search_field(&self, _object: &ObjectMetadata) -> Result<()> {
        Ok(())
    }

    async fn update_search_field(
        &self,
        _workspace_id: WorkspaceId,
        _object_id: ObjectId,
        _fields: &[SearchFieldSpec],
    ) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl RelatedRecordsSync for NoopCollaborator {
    async fn create_default_records(&self, _object: &ObjectMetadata) -> Result<()> {
        Ok(())
    }

    async fn update_views(&self, _object: &ObjectMetadata) -> Result<()> {
        Ok(())
    }

    async fn delete_views(&self, _workspace_id: WorkspaceId, _object_id: ObjectId) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PermissionsCacheInvalidator for NoopCollaborator {
    async fn invalidate(&self, _workspace_id: WorkspaceId, _version: MetadataVersion) -> Result<()> {
        Ok(())
    }
}

/// Leaves every label in its source language.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceLabelResolver;

impl LabelResolver for SourceLabelResolver {
    fn resolve(&self, _key: LabelKey, source: &str, _locale: Option<&str>) -> String {
        source.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Collaborators {
    pub remote_relations: Arc<dyn RemoteRelationProvider>,
    pub search_index: Arc<dyn SearchIndexSync>,
    pub related_records: Arc<dyn RelatedRecordsSync>,
    pub permissions: Arc<dyn PermissionsCacheInvalidator>,
    pub labels: Arc<dyn LabelResolver>,
}

impl Collaborators {
    pub fn noop() -> Self {
        Self {
            remote_relations: Arc::new(NoopCollaborator),
            search_index: Arc::new(NoopCollaborator),
            related_records: Arc::new(NoopCollaborator),
            permissions: Arc::new(NoopCollaborator),
            labels: Arc::new(SourceLabelResolver),
        }
    }
}
