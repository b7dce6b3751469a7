//! Immutable, versioned views of a workspace's catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use hashbrown::HashMap;
use tracing::debug;
use wsmeta_id::FieldId;
use wsmeta_id::IndexId;
use wsmeta_id::ObjectId;
use wsmeta_id::RelationId;
use wsmeta_id::WorkspaceId;

use crate::CatalogRevision;
use crate::MetadataVersion;
use crate::Result;
use crate::model::FieldMetadata;
use crate::model::IndexMetadata;
use crate::model::ObjectMetadata;
use crate::model::RelationMetadata;
use crate::store::MetadataStore;
use crate::store::WorkspaceRows;
use crate::validate::normalize;
use crate::version::VersionManager;

/// Every object, field, relation and index of one workspace at one metadata version.
///
/// A snapshot is never mutated after construction; a newer version replaces it wholesale.
/// Lookup maps by id and by name are built once, here, so that mutation workflows can resolve
/// relation counterparts without going back to the store.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    workspace_id: WorkspaceId,
    version: MetadataVersion,
    revision: CatalogRevision,
    objects: BTreeMap<ObjectId, Arc<ObjectMetadata>>,
    relations: BTreeMap<RelationId, RelationMetadata>,
    indexes: BTreeMap<IndexId, IndexMetadata>,
    field_owners: HashMap<FieldId, ObjectId>,
    /// Normalized singular and plural names to the objects using them.
    names: HashMap<String, Vec<ObjectId>>,
}

impl MetadataSnapshot {
    pub fn new(workspace_id: WorkspaceId, version: MetadataVersion, rows: WorkspaceRows) -> Self {
        let mut field_owners = HashMap::new();
        let mut names: HashMap<String, Vec<ObjectId>> = HashMap::new();
        let mut objects = BTreeMap::new();
        for object in rows.objects {
            for field_id in object.fields.keys() {
                field_owners.insert(*field_id, object.id);
            }
            let singular = normalize(&object.name_singular);
            let plural = normalize(&object.name_plural);
            if plural != singular {
                names.entry(plural).or_default().push(object.id);
            }
            names.entry(singular).or_default().push(object.id);
            objects.insert(object.id, Arc::new(object));
        }
        Self {
            workspace_id,
            version,
            revision: rows.revision,
            objects,
            relations: rows.relations.into_iter().map(|r| (r.id, r)).collect(),
            indexes: rows.indexes.into_iter().map(|i| (i.id, i)).collect(),
            field_owners,
            names,
        }
    }

    pub fn empty(workspace_id: WorkspaceId) -> Self {
        Self::new(
            workspace_id,
            MetadataVersion::default(),
            WorkspaceRows::default(),
        )
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn version(&self) -> MetadataVersion {
        self.version
    }

    pub fn revision(&self) -> CatalogRevision {
        self.revision
    }

    pub fn object(&self, id: ObjectId) -> Option<&Arc<ObjectMetadata>> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<ObjectMetadata>> {
        self.objects.values()
    }

    pub fn active_objects(&self) -> impl Iterator<Item = &Arc<ObjectMetadata>> {
        self.objects.values().filter(|o| o.is_active)
    }

    /// Objects whose singular or plural name matches `name`, ignoring case and surrounding
    /// whitespace.
    pub fn objects_named(&self, name: &str) -> impl Iterator<Item = &ObjectMetadata> {
        self.names
            .get(&normalize(name))
            .into_iter()
            .flatten()
            .filter_map(|id| self.objects.get(id).map(Arc::as_ref))
    }

    /// The active object with this exact singular name.
    pub fn active_object_by_name(&self, name_singular: &str) -> Option<&Arc<ObjectMetadata>> {
        self.active_objects()
            .find(|o| o.name_singular == name_singular)
    }

    /// Objects other than `exclude` whose records live in `table`. Inactive objects keep their
    /// table, so they are included; remote objects have none.
    pub fn objects_with_table<'a>(
        &'a self,
        table: &'a str,
        exclude: Option<ObjectId>,
    ) -> impl Iterator<Item = &'a Arc<ObjectMetadata>> + 'a {
        self.objects().filter(move |o| {
            Some(o.id) != exclude && !o.is_remote && o.target_table_name() == table
        })
    }

    /// A field and the object that owns it.
    pub fn field(&self, id: FieldId) -> Option<(&ObjectMetadata, &FieldMetadata)> {
        let object = self.objects.get(self.field_owners.get(&id)?)?;
        Some((object.as_ref(), object.fields.get(&id)?))
    }

    /// The other side of a relation field.
    pub fn counterpart(&self, field: &FieldMetadata) -> Option<(&ObjectMetadata, &FieldMetadata)> {
        field
            .relation
            .as_ref()
            .and_then(|relation| self.field(relation.target_field_id))
    }

    pub fn relation(&self, id: RelationId) -> Option<&RelationMetadata> {
        self.relations.get(&id)
    }

    /// Relations with the object on either side, ordered by relation id.
    pub fn relations_touching(&self, object_id: ObjectId) -> Vec<&RelationMetadata> {
        self.relations
            .values()
            .filter(|r| r.touches(object_id))
            .collect()
    }

    pub fn indexes_for(&self, object_id: ObjectId) -> Vec<&IndexMetadata> {
        self.indexes
            .values()
            .filter(|i| i.object_id == object_id)
            .collect()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn active_object_count(&self) -> usize {
        self.active_objects().count()
    }
}

/// Per-workspace cache of [`MetadataSnapshot`]s keyed on the workspace's metadata version.
///
/// Readers never block on writers: a snapshot is rebuilt from the store the first time it is
/// requested after the version moved, and in the meantime readers keep using the previous one.
#[derive(Debug)]
pub struct SnapshotCache {
    store: Arc<dyn MetadataStore>,
    versions: Arc<dyn VersionManager>,
    snapshots: DashMap<WorkspaceId, Arc<MetadataSnapshot>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn MetadataStore>, versions: Arc<dyn VersionManager>) -> Self {
        Self {
            store,
            versions,
            snapshots: DashMap::new(),
        }
    }

    pub async fn get(&self, workspace_id: WorkspaceId) -> Result<Arc<MetadataSnapshot>> {
        let current = self.versions.current(workspace_id).await?;
        let cached = self
            .snapshots
            .get(&workspace_id)
            .map(|s| Arc::clone(s.value()));
        if let Some(snapshot) = cached {
            if snapshot.version() == current {
                return Ok(snapshot);
            }
        }

        let rows = self.store.load_workspace(workspace_id).await?;
        let snapshot = Arc::new(MetadataSnapshot::new(workspace_id, current, rows));
        debug!(
            %workspace_id,
            version = %current,
            revision = %snapshot.revision(),
            objects = snapshot.object_count(),
            "rebuilt metadata snapshot"
        );

        // a concurrent rebuild may have installed a newer version while we were loading
        self.snapshots
            .entry(workspace_id)
            .and_modify(|installed| {
                if installed.version() <= snapshot.version() {
                    *installed = Arc::clone(&snapshot);
                }
            })
            .or_insert_with(|| Arc::clone(&snapshot));

        Ok(snapshot)
    }

    pub fn invalidate(&self, workspace_id: WorkspaceId) {
        self.snapshots.remove(&workspace_id);
    }

    /// The installed snapshot, if any, without consulting the version manager.
    pub fn cached(&self, workspace_id: WorkspaceId) -> Option<Arc<MetadataSnapshot>> {
        self.snapshots
            .get(&workspace_id)
            .map(|s| Arc::clone(s.value()))
    }
}
