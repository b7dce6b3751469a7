use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::sync::broadcast;
use tracing::error;
use tracing::info;
use wsmeta_catalog::CatalogBatch;
use wsmeta_catalog::CatalogError;
use wsmeta_catalog::CatalogLimits;
use wsmeta_catalog::CatalogOp;
use wsmeta_catalog::CatalogRevision;
use wsmeta_catalog::IndexMetadata;
use wsmeta_catalog::LabelKey;
use wsmeta_catalog::MetadataStore;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::SnapshotCache;
use wsmeta_catalog::StandardOverrides;
use wsmeta_catalog::VersionManager;
use wsmeta_catalog::validate;
use wsmeta_catalog::validate::ValidationError;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;
use wsmeta_migration::MigrationPlan;
use wsmeta_migration::MigrationPlanner;
use wsmeta_migration::MigrationRunner;
use wsmeta_migration::PhysicalSchemaExecutor;
use wsmeta_migration::RelationDelta;
use wsmeta_migration::RelationManager;

use crate::collaborators::Collaborators;
use crate::collaborators::PrimaryKeySettings;
use crate::collaborators::SearchFieldSpec;
use crate::defaults::NAME_FIELD_NAME;
use crate::defaults::default_fields;
use crate::error::MetadataError;
use crate::error::Result;
use crate::locks::WorkspaceLocks;
use crate::post_commit::PostCommitQueue;
use crate::post_commit::PostCommitTask;
use crate::post_commit::RetryPolicy;
use crate::standard::standard_object;

/// Locale that labels are written in.
pub const SOURCE_LOCALE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObjectInput {
    pub workspace_id: WorkspaceId,
    pub name_singular: String,
    pub name_plural: String,
    pub label_singular: String,
    pub label_plural: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_label_synced_with_name: bool,
    #[serde(default)]
    pub is_remote: bool,
    /// Only used for remote objects.
    #[serde(default)]
    pub primary_key: Option<PrimaryKeySettings>,
}

/// Changes to an object. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateObjectPayload {
    pub name_singular: Option<String>,
    pub name_plural: Option<String>,
    pub label_singular: Option<String>,
    pub label_plural: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub is_active: Option<bool>,
    pub is_label_synced_with_name: Option<bool>,
    pub label_identifier_field_id: Option<FieldId>,
    pub image_identifier_field_id: Option<FieldId>,
}

impl UpdateObjectPayload {
    fn changes_names(&self) -> bool {
        self.name_singular.is_some() || self.name_plural.is_some()
    }

    fn changes_labels(&self) -> bool {
        self.label_singular.is_some() || self.label_plural.is_some()
    }
}

/// Criteria for reading objects; every set criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub id: Option<ObjectId>,
    /// Singular or plural name, ignoring case and surrounding whitespace.
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub is_custom: Option<bool>,
    pub is_remote: Option<bool>,
}

impl ObjectFilter {
    pub fn by_id(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn matches(&self, object: &ObjectMetadata) -> bool {
        let name_matches = |name: &str| {
            let name = name.trim().to_lowercase();
            object.name_singular.to_lowercase() == name || object.name_plural.to_lowercase() == name
        };
        self.id.is_none_or(|id| object.id == id)
            && self.name.as_deref().is_none_or(name_matches)
            && self.is_active.is_none_or(|v| object.is_active == v)
            && self.is_custom.is_none_or(|v| object.is_custom == v)
            && self.is_remote.is_none_or(|v| object.is_remote == v)
    }
}

/// Published after every successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionUpdate {
    pub workspace_id: WorkspaceId,
    pub version: MetadataVersion,
}

#[derive(Debug, Clone)]
pub struct ServiceArgs {
    pub limits: CatalogLimits,
    pub lock_timeout: Duration,
    pub post_commit_retry: RetryPolicy,
    /// Names of the standard objects every custom object is related to.
    pub relation_targets: Vec<String>,
}

impl ServiceArgs {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            limits: CatalogLimits::default(),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            post_commit_retry: RetryPolicy::default(),
            relation_targets: RelationManager::DEFAULT_RELATION_TARGETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const VERSION_UPDATES_CAPACITY: usize = 1_000;

/// Creates, updates and deletes the objects of workspaces, keeping the catalog, the physical
/// schema and everything derived from them in step.
///
/// Mutations of one workspace are serialized by a per-workspace lock; reads never take it and
/// are served from the snapshot of the current metadata version.
#[derive(Debug)]
pub struct ObjectMetadataService {
    shared: Arc<Shared>,
    locks: WorkspaceLocks,
    relations: RelationManager,
    planner: MigrationPlanner,
    limits: CatalogLimits,
    lock_timeout: Duration,
}

/// The part of the service that finishes a mutation once it starts changing things.
///
/// That work runs on its own task, holding the workspace lock, so a caller that goes away
/// half way never leaves a schema change without its catalog rows and version.
#[derive(Debug)]
struct Shared {
    store: Arc<dyn MetadataStore>,
    versions: Arc<dyn VersionManager>,
    snapshots: SnapshotCache,
    runner: MigrationRunner,
    collaborators: Collaborators,
    post_commit: PostCommitQueue,
    version_updates: broadcast::Sender<VersionUpdate>,
}

/// What happens outside the catalog before a mutation's rows are committed.
#[derive(Debug)]
enum Change {
    Migrate(MigrationPlan),
    DeleteRemote(Arc<ObjectMetadata>),
    CatalogOnly,
}

/// A validated and planned mutation.
#[derive(Debug)]
struct Mutation {
    change: Change,
    batch: CatalogBatch,
    post_commit: Vec<PostCommitTask>,
}

impl ObjectMetadataService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        versions: Arc<dyn VersionManager>,
        executor: Arc<dyn PhysicalSchemaExecutor>,
        collaborators: Collaborators,
        args: ServiceArgs,
    ) -> Self {
        let (version_updates, _) = broadcast::channel(VERSION_UPDATES_CAPACITY);
        let shared = Shared {
            snapshots: SnapshotCache::new(Arc::clone(&store), Arc::clone(&versions)),
            store,
            versions,
            runner: MigrationRunner::new(executor),
            post_commit: PostCommitQueue::new(collaborators.clone(), args.post_commit_retry),
            collaborators,
            version_updates,
        };
        Self {
            shared: Arc::new(shared),
            locks: WorkspaceLocks::new(),
            relations: RelationManager::new(args.relation_targets),
            planner: MigrationPlanner::new(),
            limits: args.limits,
            lock_timeout: args.lock_timeout,
        }
    }

    pub fn subscribe_to_versions(&self) -> broadcast::Receiver<VersionUpdate> {
        self.shared.version_updates.subscribe()
    }

    pub fn post_commit(&self) -> &PostCommitQueue {
        &self.shared.post_commit
    }

    pub async fn current_version(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion> {
        Ok(self.shared.versions.current(workspace_id).await?)
    }

    pub async fn create_object(&self, input: CreateObjectInput) -> Result<Arc<ObjectMetadata>> {
        let workspace_id = input.workspace_id;
        let guard = self.locks.acquire(workspace_id, self.lock_timeout).await?;
        let snapshot = self.shared.snapshots.get(workspace_id).await?;

        let label_singular = validate::capitalize(input.label_singular.trim());
        let label_plural = validate::capitalize(input.label_plural.trim());
        validate_names_and_labels(
            &input.name_singular,
            &input.name_plural,
            &label_singular,
            &label_plural,
            input.is_label_synced_with_name,
        )?;
        validate::validate_no_conflicting_object(
            &snapshot,
            &input.name_singular,
            &input.name_plural,
            None,
        )?;
        if snapshot.object_count() >= self.limits.max_objects_per_workspace {
            return Err(ValidationError::TooManyObjects {
                limit: self.limits.max_objects_per_workspace,
            }
            .into());
        }

        let mut object = ObjectMetadata {
            id: ObjectId::new(),
            workspace_id,
            name_singular: input.name_singular,
            name_plural: input.name_plural,
            label_singular,
            label_plural,
            description: input.description,
            icon: input.icon,
            is_custom: true,
            is_remote: input.is_remote,
            is_system: false,
            is_active: true,
            is_searchable: !input.is_remote,
            is_label_synced_with_name: input.is_label_synced_with_name,
            label_identifier_field_id: None,
            image_identifier_field_id: None,
            standard_overrides: None,
            fields: IndexMap::new(),
        };

        if object.is_remote {
            let object = Arc::new(object);
            let primary_key = input.primary_key.unwrap_or_default();
            let revision = snapshot.revision();
            let version = self
                .finish(workspace_id, guard, {
                    let object = Arc::clone(&object);
                    move |shared| async move {
                        shared
                            .create_remote_object(revision, object, primary_key)
                            .await
                    }
                })
                .await?;
            info!(
                %workspace_id,
                object = %object.name_singular,
                %version,
                "created remote object"
            );
            return Ok(object);
        }

        object.fields = default_fields(&object);
        object.label_identifier_field_id = object.field_by_name(NAME_FIELD_NAME).map(|f| f.id);
        if object.label_identifier_field_id.is_none() {
            return Err(ValidationError::MissingLabelIdentifier {
                name: object.name_singular,
            }
            .into());
        }
        validate::validate_identifier_fields(&object, object.label_identifier_field_id, None)?;

        let delta = self.relations.plan_relations_for_create(&snapshot, &object)?;
        for created in &delta.created {
            object
                .fields
                .insert(created.source_field.id, created.source_field.clone());
        }
        self.check_field_limit(&object)?;

        let planned = self
            .planner
            .plan(&snapshot, None, Some(&object), &delta)?;

        let mut batch = CatalogBatch::new(workspace_id, snapshot.revision());
        batch.push(CatalogOp::SaveObject(object.clone()));
        push_relation_rows(&mut batch, &delta);
        if !planned.effects.indexes.is_empty() {
            batch.push(CatalogOp::SaveIndexes(planned.effects.indexes));
        }
        let object = Arc::new(object);
        let mutation = Mutation {
            change: Change::Migrate(planned.plan),
            batch,
            post_commit: vec![
                PostCommitTask::CreateSearchField {
                    object: Arc::clone(&object),
                },
                PostCommitTask::CreateDefaultRecords {
                    object: Arc::clone(&object),
                },
            ],
        };
        let version = self.apply(guard, mutation).await?;
        info!(
            %workspace_id,
            object = %object.name_singular,
            object_id = %object.id,
            relations = delta.created.len(),
            %version,
            "created object"
        );
        Ok(object)
    }

    pub async fn update_object(
        &self,
        workspace_id: WorkspaceId,
        object_id: ObjectId,
        payload: UpdateObjectPayload,
    ) -> Result<Arc<ObjectMetadata>> {
        let guard = self.locks.acquire(workspace_id, self.lock_timeout).await?;
        let snapshot = self.shared.snapshots.get(workspace_id).await?;
        let current = snapshot
            .object(object_id)
            .map(Arc::clone)
            .ok_or(MetadataError::NotFound {
                workspace_id,
                object_id,
            })?;

        let proposed = merge_update(&current, &payload)?;
        let names_changed = proposed.name_singular != current.name_singular
            || proposed.name_plural != current.name_plural;
        if current.is_custom
            && (names_changed || payload.changes_labels() || payload.is_label_synced_with_name.is_some())
        {
            validate_names_and_labels(
                &proposed.name_singular,
                &proposed.name_plural,
                &proposed.label_singular,
                &proposed.label_plural,
                proposed.is_label_synced_with_name,
            )?;
        }
        if names_changed || (proposed.is_active && !current.is_active) {
            validate::validate_no_conflicting_object(
                &snapshot,
                &proposed.name_singular,
                &proposed.name_plural,
                Some(object_id),
            )?;
        }
        validate::validate_identifier_fields(
            &proposed,
            payload.label_identifier_field_id,
            payload.image_identifier_field_id,
        )?;
        if !proposed.is_remote && proposed.label_identifier_field_id.is_none() {
            return Err(ValidationError::MissingLabelIdentifier {
                name: proposed.name_singular,
            }
            .into());
        }

        let (delta, mut planned) = if proposed.is_remote {
            (RelationDelta::default(), None)
        } else {
            let delta = self
                .relations
                .plan_relations_for_update(&snapshot, &current, &proposed)?;
            let planned = self
                .planner
                .plan(&snapshot, Some(&current), Some(&proposed), &delta)?;
            (delta, Some(planned))
        };
        let views_sync_required = planned.as_ref().map_or_else(
            || current.label_plural != proposed.label_plural || current.icon != proposed.icon,
            |p| p.effects.views_sync_required,
        );

        // the search vector follows the label identifier
        let search_fields = search_source_change(&current, &proposed);
        if let (Some(planned), Some(_)) = (planned.as_mut(), &search_fields) {
            let indexes: Vec<IndexMetadata> = if planned.effects.renamed_table.is_some() {
                planned.effects.indexes.clone()
            } else {
                snapshot.indexes_for(object_id).into_iter().cloned().collect()
            };
            let second_pass = self.planner.plan_search_vector_update(&proposed, &indexes);
            planned.plan.extend(second_pass.steps().iter().cloned());
            planned.plan.check_dependency_order()?;
        }

        let mut batch = CatalogBatch::new(workspace_id, snapshot.revision());
        batch.push(CatalogOp::SaveObject(proposed.clone()));
        let renamed_fields: Vec<_> = delta.renamed.iter().map(|r| r.field.clone()).collect();
        if !renamed_fields.is_empty() {
            batch.push(CatalogOp::SaveFields(renamed_fields));
        }
        let change = match planned {
            Some(planned) => {
                if !planned.effects.indexes.is_empty() {
                    batch.push(CatalogOp::SaveIndexes(planned.effects.indexes));
                }
                Change::Migrate(planned.plan)
            }
            None => Change::CatalogOnly,
        };

        let proposed = Arc::new(proposed);
        let mut post_commit = vec![];
        if views_sync_required {
            post_commit.push(PostCommitTask::UpdateViews {
                object: Arc::clone(&proposed),
            });
        }
        if let Some(fields) = search_fields {
            post_commit.push(PostCommitTask::UpdateSearchField {
                workspace_id,
                object_id,
                fields,
            });
        }
        let mutation = Mutation {
            change,
            batch,
            post_commit,
        };
        let version = self.apply(guard, mutation).await?;
        info!(
            %workspace_id,
            object = %proposed.name_singular,
            %object_id,
            renamed_relations = delta.renamed.len(),
            %version,
            "updated object"
        );
        Ok(proposed)
    }

    /// Delete an object with its fields, relations, indexes and table.
    ///
    /// Rows and columns that are already gone are skipped, so a delete can be repeated after a
    /// partial failure.
    pub async fn delete_object(
        &self,
        workspace_id: WorkspaceId,
        object_id: ObjectId,
    ) -> Result<Arc<ObjectMetadata>> {
        let guard = self.locks.acquire(workspace_id, self.lock_timeout).await?;
        let snapshot = self.shared.snapshots.get(workspace_id).await?;
        let object = snapshot
            .object(object_id)
            .map(Arc::clone)
            .ok_or(MetadataError::NotFound {
                workspace_id,
                object_id,
            })?;

        let (delta, change) = if object.is_remote {
            (RelationDelta::default(), Change::DeleteRemote(Arc::clone(&object)))
        } else {
            let delta = self.relations.plan_relations_for_delete(&snapshot, &object)?;
            let planned = self.planner.plan(&snapshot, Some(&object), None, &delta)?;
            (delta, Change::Migrate(planned.plan))
        };

        let mut field_ids: Vec<FieldId> = object.fields.keys().copied().collect();
        field_ids.extend(delta.counterpart_fields_to_delete());
        let mut relation_ids = delta.relations_to_delete();
        for relation in snapshot.relations_touching(object_id) {
            if !relation_ids.contains(&relation.id) {
                relation_ids.push(relation.id);
            }
        }
        let index_ids = snapshot
            .indexes_for(object_id)
            .into_iter()
            .map(|i| i.id)
            .collect();

        let mut batch = CatalogBatch::new(workspace_id, snapshot.revision());
        batch.push(CatalogOp::DeleteFields(field_ids));
        batch.push(CatalogOp::DeleteRelations(relation_ids));
        batch.push(CatalogOp::DeleteIndexes(index_ids));
        batch.push(CatalogOp::DeleteObject(object_id));
        let mutation = Mutation {
            change,
            batch,
            post_commit: vec![PostCommitTask::DeleteViews {
                workspace_id,
                object_id,
            }],
        };
        let version = self.apply(guard, mutation).await?;
        info!(
            %workspace_id,
            object = %object.name_singular,
            %object_id,
            relations = delta.removed.len(),
            %version,
            "deleted object"
        );
        Ok(object)
    }

    /// The first object matching `filter`, in creation order.
    pub async fn find_one_in_workspace(
        &self,
        workspace_id: WorkspaceId,
        filter: &ObjectFilter,
    ) -> Result<Option<Arc<ObjectMetadata>>> {
        let snapshot = self.shared.snapshots.get(workspace_id).await?;
        Ok(snapshot
            .objects()
            .find(|o| filter.matches(o))
            .map(Arc::clone))
    }

    /// Every object matching `filter`, in creation order.
    pub async fn find_many_in_workspace(
        &self,
        workspace_id: WorkspaceId,
        filter: &ObjectFilter,
    ) -> Result<Vec<Arc<ObjectMetadata>>> {
        let snapshot = self.shared.snapshots.get(workspace_id).await?;
        Ok(snapshot
            .objects()
            .filter(|o| filter.matches(o))
            .map(Arc::clone)
            .collect())
    }

    /// Remove every catalog row of the workspace. The physical schema is left alone.
    pub async fn delete_all_for_workspace(&self, workspace_id: WorkspaceId) -> Result<()> {
        let guard = self.locks.acquire(workspace_id, self.lock_timeout).await?;
        let version = self
            .finish(workspace_id, guard, move |shared| async move {
                shared.store.delete_workspace(workspace_id).await?;
                shared.snapshots.invalidate(workspace_id);
                shared.bump(workspace_id).await
            })
            .await?;
        self.locks.remove_idle(workspace_id);
        info!(%workspace_id, %version, "deleted all object metadata of workspace");
        Ok(())
    }

    /// Create the standard relation-target objects that the workspace does not have yet.
    pub async fn seed_standard_objects(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<Arc<ObjectMetadata>>> {
        let guard = self.locks.acquire(workspace_id, self.lock_timeout).await?;
        let snapshot = self.shared.snapshots.get(workspace_id).await?;

        let mut seeded = vec![];
        let mut plan = MigrationPlan::new(workspace_id);
        let mut batch = CatalogBatch::new(workspace_id, snapshot.revision());
        for name in self.relations.relation_targets() {
            if snapshot.objects_named(name).next().is_some() {
                continue;
            }
            let object = standard_object(workspace_id, name);
            let planned = self
                .planner
                .plan(&snapshot, None, Some(&object), &RelationDelta::default())?;
            plan.extend(planned.plan.steps().iter().cloned());
            batch.push(CatalogOp::SaveObject(object.clone()));
            if !planned.effects.indexes.is_empty() {
                batch.push(CatalogOp::SaveIndexes(planned.effects.indexes));
            }
            seeded.push(Arc::new(object));
        }
        if seeded.is_empty() {
            return Ok(seeded);
        }

        let mutation = Mutation {
            change: Change::Migrate(plan),
            batch,
            post_commit: vec![],
        };
        let version = self.apply(guard, mutation).await?;
        info!(
            %workspace_id,
            objects = seeded.len(),
            %version,
            "seeded standard objects"
        );
        Ok(seeded)
    }

    /// The text to show for `key` of `object` in `locale`.
    ///
    /// Custom objects are shown as they were written. Standard objects prefer a workspace
    /// override for the locale, then the workspace's own override in the source locale, then
    /// the translation of the built-in text.
    pub fn resolve_overridable_string(
        &self,
        object: &ObjectMetadata,
        key: LabelKey,
        locale: Option<&str>,
    ) -> String {
        let raw = key.raw(object).unwrap_or_default();
        if object.is_custom {
            return raw.to_string();
        }
        if let Some(overrides) = &object.standard_overrides {
            let translated = locale
                .and_then(|locale| overrides.translations.get(locale))
                .and_then(|o| key.overridden(o));
            if let Some(translated) = translated {
                return translated.to_string();
            }
            if locale.is_none_or(|l| l == SOURCE_LOCALE) {
                if let Some(overridden) = key.overridden_default(overrides) {
                    return overridden.to_string();
                }
            }
        }
        self.shared.collaborators.labels.resolve(key, raw, locale)
    }

    fn check_field_limit(&self, object: &ObjectMetadata) -> Result<()> {
        if object.fields.len() > self.limits.max_fields_per_object {
            return Err(ValidationError::TooManyFields {
                name: object.name_singular.clone(),
                limit: self.limits.max_fields_per_object,
            }
            .into());
        }
        Ok(())
    }

    async fn apply(
        &self,
        guard: OwnedMutexGuard<()>,
        mutation: Mutation,
    ) -> Result<MetadataVersion> {
        let workspace_id = mutation.batch.workspace_id;
        self.finish(workspace_id, guard, move |shared| async move {
            shared.apply(mutation).await
        })
        .await
    }

    /// Run `work` to completion on its own task, holding the workspace lock until it is done.
    async fn finish<F, Fut, T>(
        &self,
        workspace_id: WorkspaceId,
        guard: OwnedMutexGuard<()>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<Shared>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let work = work(Arc::clone(&self.shared));
        tokio::spawn(async move {
            let result = work.await;
            drop(guard);
            result
        })
        .await
        .map_err(|source| MetadataError::Aborted {
            workspace_id,
            source,
        })?
    }
}

impl Shared {
    async fn apply(&self, mutation: Mutation) -> Result<MetadataVersion> {
        let workspace_id = mutation.batch.workspace_id;
        match mutation.change {
            Change::Migrate(plan) => {
                self.runner.run(plan).await?;
            }
            Change::DeleteRemote(object) => self
                .collaborators
                .remote_relations
                .delete_foreign_keys(&object)
                .await
                .map_err(MetadataError::RemoteRelations)?,
            Change::CatalogOnly => {}
        }
        self.commit(mutation.batch).await?;
        let version = self.bump(workspace_id).await?;
        self.post_commit.submit_all(mutation.post_commit);
        Ok(version)
    }

    /// Remote objects have no table here; their relations are wired up by the
    /// [`RemoteRelationProvider`](crate::collaborators::RemoteRelationProvider), and the object
    /// row is removed again if that fails.
    async fn create_remote_object(
        &self,
        revision: CatalogRevision,
        object: Arc<ObjectMetadata>,
        primary_key: PrimaryKeySettings,
    ) -> Result<MetadataVersion> {
        let workspace_id = object.workspace_id;
        let mut batch = CatalogBatch::new(workspace_id, revision);
        batch.push(CatalogOp::SaveObject(object.as_ref().clone()));
        let revision = self.commit(batch).await?;

        let Err(e) = self
            .collaborators
            .remote_relations
            .create_foreign_keys(&object, &primary_key)
            .await
        else {
            return self.bump(workspace_id).await;
        };

        error!(
            %workspace_id,
            object = %object.name_singular,
            error = %e,
            "creating remote foreign keys failed, removing object"
        );
        let mut batch = CatalogBatch::new(workspace_id, revision);
        batch.push(CatalogOp::DeleteObject(object.id));
        match self.commit(batch).await {
            // the rows moved without a new version, so the cached snapshot is stale
            Ok(_) => self.snapshots.invalidate(workspace_id),
            Err(compensation) => {
                error!(
                    %workspace_id,
                    object_id = %object.id,
                    error = %compensation,
                    "could not remove remote object after failure"
                );
                // the row stays, so readers must see it
                self.bump(workspace_id).await?;
            }
        }
        Err(MetadataError::RemoteRelations(e))
    }

    async fn commit(&self, batch: CatalogBatch) -> Result<CatalogRevision> {
        let workspace_id = batch.workspace_id;
        self.store.commit(batch).await.map_err(|e| {
            if matches!(e, CatalogError::ConcurrentModification { .. }) {
                self.snapshots.invalidate(workspace_id);
            }
            e.into()
        })
    }

    /// Publish a new metadata version. Called once per successful mutation, after its catalog
    /// rows are committed.
    async fn bump(&self, workspace_id: WorkspaceId) -> Result<MetadataVersion> {
        let version = self.versions.bump(workspace_id).await?;
        // no subscribers is fine
        let _ = self.version_updates.send(VersionUpdate {
            workspace_id,
            version,
        });
        self.post_commit.submit(PostCommitTask::InvalidatePermissions {
            workspace_id,
            version,
        });
        Ok(version)
    }
}

fn validate_names_and_labels(
    name_singular: &str,
    name_plural: &str,
    label_singular: &str,
    label_plural: &str,
    synced: bool,
) -> Result<(), ValidationError> {
    validate::validate_object_names(name_singular, name_plural)?;
    validate::validate_object_labels(label_singular, label_plural)?;
    validate::validate_distinct("names", name_singular, name_plural)?;
    validate::validate_distinct("labels", label_singular, label_plural)?;
    if synced {
        validate::validate_name_and_label_are_synced(name_singular, label_singular)?;
        validate::validate_name_and_label_are_synced(name_plural, label_plural)?;
    }
    Ok(())
}

/// Apply `payload` to `current`.
///
/// Standard objects keep their names; label, description and icon changes to them are
/// recorded as workspace overrides rather than replacing the built-in values.
fn merge_update(
    current: &ObjectMetadata,
    payload: &UpdateObjectPayload,
) -> Result<ObjectMetadata, ValidationError> {
    let mut proposed = current.clone();
    if let Some(v) = payload.is_active {
        proposed.is_active = v;
    }
    if let Some(v) = payload.label_identifier_field_id {
        proposed.label_identifier_field_id = Some(v);
    }
    if let Some(v) = payload.image_identifier_field_id {
        proposed.image_identifier_field_id = Some(v);
    }

    if !current.is_custom {
        let renames = payload
            .name_singular
            .as_ref()
            .is_some_and(|n| *n != current.name_singular)
            || payload
                .name_plural
                .as_ref()
                .is_some_and(|n| *n != current.name_plural);
        if renames {
            return Err(ValidationError::ImmutableStandardObject {
                name: current.name_singular.clone(),
            });
        }
        let overrides = proposed
            .standard_overrides
            .get_or_insert_with(StandardOverrides::default);
        if let Some(v) = &payload.label_singular {
            overrides.label_singular = Some(validate::capitalize(v.trim()));
        }
        if let Some(v) = &payload.label_plural {
            overrides.label_plural = Some(validate::capitalize(v.trim()));
        }
        if let Some(v) = &payload.description {
            overrides.description = Some(v.clone());
        }
        if let Some(v) = &payload.icon {
            overrides.icon = Some(v.clone());
        }
        if proposed.standard_overrides == Some(StandardOverrides::default()) {
            proposed.standard_overrides = None;
        }
        return Ok(proposed);
    }

    if let Some(v) = &payload.label_singular {
        proposed.label_singular = validate::capitalize(v.trim());
    }
    if let Some(v) = &payload.label_plural {
        proposed.label_plural = validate::capitalize(v.trim());
    }
    if let Some(v) = &payload.description {
        proposed.description = Some(v.clone());
    }
    if let Some(v) = &payload.icon {
        proposed.icon = Some(v.clone());
    }
    if let Some(v) = payload.is_label_synced_with_name {
        proposed.is_label_synced_with_name = v;
    }

    if proposed.is_label_synced_with_name && payload.changes_labels() && !payload.changes_names() {
        proposed.name_singular = validate::name_from_label(&proposed.label_singular);
        proposed.name_plural = validate::name_from_label(&proposed.label_plural);
    } else {
        if let Some(v) = &payload.name_singular {
            proposed.name_singular = v.clone();
        }
        if let Some(v) = &payload.name_plural {
            proposed.name_plural = v.clone();
        }
    }
    Ok(proposed)
}

/// The new search vector sources, if the label identifier moved to another searchable field.
fn search_source_change(
    current: &ObjectMetadata,
    proposed: &ObjectMetadata,
) -> Option<Vec<SearchFieldSpec>> {
    if !proposed.is_searchable
        || current.label_identifier_field_id == proposed.label_identifier_field_id
    {
        return None;
    }
    let field = proposed
        .label_identifier_field()
        .filter(|f| f.field_type.is_searchable())?;
    Some(vec![SearchFieldSpec {
        name: field.name.clone(),
        field_type: field.field_type.clone(),
    }])
}

fn push_relation_rows(batch: &mut CatalogBatch, delta: &RelationDelta) {
    let counterparts = delta.counterpart_fields_to_save();
    if !counterparts.is_empty() {
        batch.push(CatalogOp::SaveFields(counterparts));
    }
    let relations = delta.relations_to_save();
    if !relations.is_empty() {
        batch.push(CatalogOp::SaveRelations(relations));
    }
}
