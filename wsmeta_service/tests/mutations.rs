use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use tokio::sync::Notify;
use wsmeta_catalog::CatalogBatch;
use wsmeta_catalog::CatalogOp;
use wsmeta_catalog::InMemoryVersionManager;
use wsmeta_catalog::MetadataStore;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::VersionManager;
use wsmeta_catalog::mem::MemMetadataStore;
use wsmeta_catalog::validate::ValidationError;
use wsmeta_id::WorkspaceId;
use wsmeta_migration::AppliedSteps;
use wsmeta_migration::InMemorySchemaExecutor;
use wsmeta_migration::MigrationPlan;
use wsmeta_migration::MigrationStep;
use wsmeta_migration::PhysicalSchemaExecutor;
use wsmeta_migration::SchemaExecutionError;
use wsmeta_service::Collaborators;
use wsmeta_service::CreateObjectInput;
use wsmeta_service::ErrorKind;
use wsmeta_service::MetadataError;
use wsmeta_service::ObjectFilter;
use wsmeta_service::ObjectMetadataService;
use wsmeta_service::ServiceArgs;
use wsmeta_service::UpdateObjectPayload;
use wsmeta_service::collaborators::CollaboratorError;
use wsmeta_service::collaborators::PermissionsCacheInvalidator;

struct TestService {
    workspace_id: WorkspaceId,
    store: Arc<MemMetadataStore>,
    versions: Arc<InMemoryVersionManager>,
    executor: Arc<InMemorySchemaExecutor>,
    service: ObjectMetadataService,
}

impl TestService {
    /// A service over in-memory adapters with the standard relation targets already seeded.
    async fn new() -> Self {
        Self::with_collaborators(Collaborators::noop()).await
    }

    async fn with_collaborators(collaborators: Collaborators) -> Self {
        let store = Arc::new(MemMetadataStore::new());
        let versions = Arc::new(InMemoryVersionManager::new());
        let executor = Arc::new(InMemorySchemaExecutor::new());
        let service = ObjectMetadataService::new(
            Arc::clone(&store) as _,
            Arc::clone(&versions) as _,
            Arc::clone(&executor) as _,
            collaborators,
            ServiceArgs::default(),
        );
        let workspace_id = WorkspaceId::new();
        service.seed_standard_objects(workspace_id).await.unwrap();
        Self {
            workspace_id,
            store,
            versions,
            executor,
            service,
        }
    }

    fn input(&self, name_singular: &str, name_plural: &str) -> CreateObjectInput {
        CreateObjectInput {
            workspace_id: self.workspace_id,
            name_singular: name_singular.to_string(),
            name_plural: name_plural.to_string(),
            label_singular: name_singular.to_string(),
            label_plural: name_plural.to_string(),
            description: None,
            icon: None,
            is_label_synced_with_name: false,
            is_remote: false,
            primary_key: None,
        }
    }

    async fn version(&self) -> MetadataVersion {
        self.service.current_version(self.workspace_id).await.unwrap()
    }

    fn last_plan(&self) -> Vec<MigrationStep> {
        self.executor
            .history(self.workspace_id)
            .last()
            .map(|applied| applied.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn plan_count(&self) -> usize {
        self.executor.history(self.workspace_id).len()
    }
}

#[test_log::test(tokio::test)]
async fn test_create_task_end_to_end() {
    let t = TestService::new().await;
    let before = t.version().await;

    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();

    assert_eq!(t.version().await, before.next());
    let own_fields: Vec<&str> = task
        .fields
        .values()
        .filter(|f| f.relation.is_none())
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(
        own_fields,
        vec![
            "id",
            "name",
            "createdAt",
            "updatedAt",
            "deletedAt",
            "createdBy",
            "position",
            "searchVector"
        ]
    );
    assert_eq!(task.label_identifier_field().unwrap().name, "name");
    assert_eq!(task.label_singular, "Task");

    let plan = t.last_plan();
    let create_tables: Vec<_> = plan
        .iter()
        .filter(|s| matches!(s, MigrationStep::CreateTable { .. }))
        .collect();
    assert_eq!(
        create_tables,
        vec![&MigrationStep::CreateTable {
            table: "_task".to_string()
        }]
    );
    let own_columns = plan
        .iter()
        .filter(|s| matches!(s, MigrationStep::AddColumn { table, .. } if table == "_task"))
        .count();
    let schema = t.executor.schema(t.workspace_id);
    assert_eq!(own_columns, schema.table("_task").unwrap().columns.len());

    // one relation to every seeded standard object
    for target in ["favorite", "attachment", "timelineActivity", "noteTarget", "taskTarget"] {
        let table = schema.table(target).unwrap();
        assert!(table.has_column("taskId"), "{target} has no join column");
    }

    let found = t
        .service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_name("Tasks"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, task.id);
}

#[test_log::test(tokio::test)]
async fn test_equal_names_are_rejected_without_side_effects() {
    let t = TestService::new().await;
    let before = t.version().await;
    let plans = t.plan_count();

    let err = t
        .service
        .create_object(t.input("task", "task"))
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            MetadataError::Validation(ValidationError::DuplicateIdentifier { .. })
        ),
        "{err}"
    );
    assert_eq!(t.version().await, before);
    assert_eq!(t.plan_count(), plans);
    let custom = t
        .service
        .find_many_in_workspace(
            t.workspace_id,
            &ObjectFilter {
                is_custom: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(custom.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_colliding_names_leave_the_first_object_intact() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    let before = t.version().await;

    for (singular, plural) in [("taSk", "taskItems"), ("todo", "tasks"), ("tasks", "taskLists")] {
        let err = t
            .service
            .create_object(t.input(singular, plural))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                MetadataError::Validation(ValidationError::ConflictingObject { existing_object_id, .. })
                    if existing_object_id == task.id
            ),
            "{singular}/{plural}: {err}"
        );
    }

    assert_eq!(t.version().await, before);
    let found = t
        .service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_id(task.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, task);
}

#[test_log::test(tokio::test)]
async fn test_rename_moves_table_and_counterparts() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    let before = t.version().await;

    let job = t
        .service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                name_singular: Some("job".to_string()),
                name_plural: Some("jobs".to_string()),
                label_singular: Some("Job".to_string()),
                label_plural: Some("Jobs".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(t.version().await, before.next());
    assert_eq!(job.target_table_name(), "_job");

    let plan = t.last_plan();
    let renames: Vec<_> = plan
        .iter()
        .filter(|s| matches!(s, MigrationStep::RenameTable { .. }))
        .collect();
    assert_eq!(
        renames,
        vec![&MigrationStep::RenameTable {
            from: "_task".to_string(),
            to: "_job".to_string()
        }]
    );
    let enums: Vec<_> = plan
        .iter()
        .filter_map(|s| match s {
            MigrationStep::RecomputeEnum {
                table,
                column,
                from_type,
                to_type,
            } => Some((table.as_str(), column.as_str(), from_type.as_str(), to_type.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        enums,
        vec![(
            "_job",
            "createdBySource",
            "_task_createdBySource_enum",
            "_job_createdBySource_enum"
        )]
    );
    let column_renames = plan
        .iter()
        .filter(|s| {
            matches!(s, MigrationStep::RenameColumn { from, to, .. } if from == "taskId" && to == "jobId")
        })
        .count();
    assert_eq!(column_renames, 5);

    let schema = t.executor.schema(t.workspace_id);
    assert!(!schema.has_table("_task"));
    assert!(schema.table("favorite").unwrap().has_column("jobId"));

    let favorite = t
        .service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_name("favorite"))
        .await
        .unwrap()
        .unwrap();
    assert!(favorite.field_by_name("job").is_some());
    assert!(favorite.field_by_name("task").is_none());
}

#[test_log::test(tokio::test)]
async fn test_delete_survives_partially_removed_counterparts() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();

    // a previous attempt got as far as removing the counterpart on favorite
    let rows = t.store.load_workspace(t.workspace_id).await.unwrap();
    let favorite = rows
        .objects
        .iter()
        .find(|o| o.name_singular == "favorite")
        .unwrap();
    let counterpart = favorite.field_by_name("task").unwrap().id;
    let mut batch = CatalogBatch::new(t.workspace_id, rows.revision);
    batch.push(CatalogOp::DeleteFields(vec![counterpart]));
    t.store.commit(batch).await.unwrap();
    t.versions.bump(t.workspace_id).await.unwrap();
    let before = t.version().await;

    t.service
        .delete_object(t.workspace_id, task.id)
        .await
        .unwrap();

    assert_eq!(t.version().await, before.next());
    let schema = t.executor.schema(t.workspace_id);
    assert!(!schema.has_table("_task"));
    assert!(!schema.table("favorite").unwrap().has_column("taskId"));

    let rows = t.store.load_workspace(t.workspace_id).await.unwrap();
    assert!(rows.objects.iter().all(|o| o.id != task.id));
    assert!(rows.relations.iter().all(|r| !r.touches(task.id)));
    assert!(
        rows.objects
            .iter()
            .flat_map(|o| o.fields.values())
            .all(|f| f.relation.as_ref().is_none_or(|r| r.target_object_id != task.id))
    );

    let err = t
        .service
        .delete_object(t.workspace_id, task.id)
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound { .. }));
}

#[test_log::test(tokio::test)]
async fn test_every_mutation_bumps_the_version_once() {
    let t = TestService::new().await;
    let mut updates = t.service.subscribe_to_versions();
    let start = t.version().await;

    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    t.service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                label_plural: Some("To do".to_string()),
                icon: Some("IconCheckbox".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    t.service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                name_singular: Some("job".to_string()),
                name_plural: Some("jobs".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    t.service
        .delete_object(t.workspace_id, task.id)
        .await
        .unwrap();

    let mut seen = vec![];
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.workspace_id, t.workspace_id);
        seen.push(update.version.get());
    }
    let expected: Vec<u64> = (1..=4).map(|i| start.get() + i).collect();
    assert_eq!(seen, expected);
}

#[test_log::test(tokio::test)]
async fn test_failed_migration_leaves_catalog_and_version_alone() {
    let t = TestService::new().await;
    let before = t.version().await;
    t.executor.fail_at_step(t.workspace_id, 3);

    let err = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap_err();

    assert!(matches!(err, MetadataError::SchemaExecution(_)), "{err}");
    assert_eq!(t.version().await, before);
    assert!(!t.executor.schema(t.workspace_id).has_table("_task"));
    let found = t
        .service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_name("task"))
        .await
        .unwrap();
    assert_eq!(found, None);

    // the same request goes through once the datastore recovers
    t.service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_label_identifier_change_regenerates_search_vector() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    let id_field = task.field_by_name("id").unwrap().id;
    let before = t.version().await;

    // the id is not searchable, so the search vector stays as it is
    t.service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                label_identifier_field_id: Some(id_field),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(t.version().await, before.next());

    let name_field = task.field_by_name("name").unwrap().id;
    let plans = t.plan_count();
    t.service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                label_identifier_field_id: Some(name_field),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(t.version().await, before.next().next());
    assert_eq!(t.plan_count(), plans + 1);
    assert!(t.last_plan().iter().any(|s| matches!(
        s,
        MigrationStep::AddColumn { table, column } if table == "_task" && column.name == "searchVector"
    )));
}

#[test_log::test(tokio::test)]
async fn test_unknown_label_identifier_is_rejected() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    let favorite = t
        .service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_name("favorite"))
        .await
        .unwrap()
        .unwrap();
    let foreign_field = favorite.field_by_name("id").unwrap().id;

    let err = t
        .service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                label_identifier_field_id: Some(foreign_field),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Validation(ValidationError::InvalidIdentifierField { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn test_reads_alongside_a_mutation() {
    let t = Arc::new(TestService::new().await);
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();

    let writer = {
        let t = Arc::clone(&t);
        tokio::spawn(async move {
            t.service
                .update_object(
                    t.workspace_id,
                    task.id,
                    UpdateObjectPayload {
                        description: Some("things to do".to_string()),
                        ..Default::default()
                    },
                )
                .await
        })
    };
    let objects = t
        .service
        .find_many_in_workspace(t.workspace_id, &ObjectFilter::default())
        .await
        .unwrap();
    assert_eq!(objects.len(), 6);
    writer.await.unwrap().unwrap();
}

#[test_log::test(tokio::test)]
async fn test_delete_all_for_workspace() {
    let t = TestService::new().await;
    t.service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    let before = t.version().await;

    t.service
        .delete_all_for_workspace(t.workspace_id)
        .await
        .unwrap();

    assert_eq!(t.version().await, before.next());
    let objects = t
        .service
        .find_many_in_workspace(t.workspace_id, &ObjectFilter::default())
        .await
        .unwrap();
    assert!(objects.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_reactivation_checks_for_conflicts() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    t.service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // an inactive object does not hold on to its names, but it keeps its table
    let err = t
        .service
        .create_object(t.input("task", "taskItems"))
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::Planning(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let todo = t
        .service
        .create_object(t.input("todo", "tasks"))
        .await
        .unwrap();
    assert!(todo.is_active);

    let err = t
        .service
        .update_object(
            t.workspace_id,
            task.id,
            UpdateObjectPayload {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetadataError::Validation(ValidationError::ConflictingObject { .. })
    ));
}

/// Holds the first plan it is given until `gate` is notified.
#[derive(Debug, Default)]
struct GatedExecutor {
    inner: InMemorySchemaExecutor,
    passed: AtomicBool,
    started: Notify,
    gate: Notify,
}

#[async_trait]
impl PhysicalSchemaExecutor for GatedExecutor {
    async fn execute(&self, plan: &MigrationPlan) -> Result<AppliedSteps, SchemaExecutionError> {
        if !self.passed.swap(true, Ordering::SeqCst) {
            self.started.notify_one();
            self.gate.notified().await;
        }
        self.inner.execute(plan).await
    }
}

fn gated_service() -> (Arc<GatedExecutor>, Arc<ObjectMetadataService>) {
    let executor = Arc::new(GatedExecutor::default());
    let service = ObjectMetadataService::new(
        Arc::new(MemMetadataStore::new()),
        Arc::new(InMemoryVersionManager::new()),
        Arc::clone(&executor) as _,
        Collaborators::noop(),
        ServiceArgs::default(),
    );
    (executor, Arc::new(service))
}

fn input(workspace_id: WorkspaceId, name_singular: &str, name_plural: &str) -> CreateObjectInput {
    CreateObjectInput {
        workspace_id,
        name_singular: name_singular.to_string(),
        name_plural: name_plural.to_string(),
        label_singular: name_singular.to_string(),
        label_plural: name_plural.to_string(),
        description: None,
        icon: None,
        is_label_synced_with_name: false,
        is_remote: false,
        primary_key: None,
    }
}

#[test_log::test(tokio::test)]
async fn test_abandoned_create_is_committed() {
    let (executor, service) = gated_service();
    let workspace_id = WorkspaceId::new();

    let caller = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .create_object(input(workspace_id, "task", "tasks"))
                .await
        })
    };
    executor.started.notified().await;
    caller.abort();
    executor.gate.notify_one();

    // waits for the abandoned create to finish
    service
        .create_object(input(workspace_id, "note", "notes"))
        .await
        .unwrap();

    let schema = executor.inner.schema(workspace_id);
    assert!(schema.has_table("_task"));
    assert!(schema.has_table("_note"));
    let task = service
        .find_one_in_workspace(workspace_id, &ObjectFilter::by_name("task"))
        .await
        .unwrap();
    assert!(task.is_some());
    assert_eq!(
        service.current_version(workspace_id).await.unwrap(),
        MetadataVersion::new(2)
    );

    let err = service
        .create_object(input(workspace_id, "task", "tasks"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            MetadataError::Validation(ValidationError::ConflictingObject { .. })
        ),
        "{err}"
    );
}

#[test_log::test(tokio::test)]
async fn test_workspaces_do_not_wait_for_each_other() {
    let (executor, service) = gated_service();
    let blocked = WorkspaceId::new();
    let other = WorkspaceId::new();

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.create_object(input(blocked, "task", "tasks")).await })
    };
    executor.started.notified().await;

    tokio::time::timeout(
        Duration::from_secs(5),
        service.create_object(input(other, "task", "tasks")),
    )
    .await
    .expect("mutation of another workspace was held up")
    .unwrap();
    assert_eq!(
        service.current_version(blocked).await.unwrap(),
        MetadataVersion::default()
    );

    executor.gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(
        service.current_version(blocked).await.unwrap(),
        MetadataVersion::new(1)
    );
}

#[test_log::test(tokio::test)]
async fn test_concurrent_creates_of_one_name() {
    let t = TestService::new().await;
    let before = t.version().await;

    let results = join_all((0..4).map(|_| t.service.create_object(t.input("task", "tasks")))).await;

    let (created, rejected): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(created.len(), 1);
    for err in rejected.into_iter().filter_map(Result::err) {
        assert!(
            matches!(
                err,
                MetadataError::Validation(ValidationError::ConflictingObject { .. })
            ),
            "{err}"
        );
    }
    assert_eq!(t.version().await, before.next());
    assert_eq!(t.plan_count(), 2);
}

#[test_log::test(tokio::test)]
async fn test_stale_snapshot_is_rejected_and_refreshed() {
    let t = TestService::new().await;
    let task = t
        .service
        .create_object(t.input("task", "tasks"))
        .await
        .unwrap();
    t.service
        .find_one_in_workspace(t.workspace_id, &ObjectFilter::by_id(task.id))
        .await
        .unwrap();
    let before = t.version().await;

    // another writer commits without publishing a version
    let rows = t.store.load_workspace(t.workspace_id).await.unwrap();
    t.store
        .commit(CatalogBatch::new(t.workspace_id, rows.revision))
        .await
        .unwrap();

    let update = UpdateObjectPayload {
        description: Some("things to do".to_string()),
        ..Default::default()
    };
    let err = t
        .service
        .update_object(t.workspace_id, task.id, update.clone())
        .await
        .unwrap_err();
    assert!(
        matches!(err, MetadataError::ConcurrentModification { .. }),
        "{err}"
    );
    assert!(err.is_retryable());
    assert_eq!(t.version().await, before);

    let updated = t
        .service
        .update_object(t.workspace_id, task.id, update)
        .await
        .unwrap();
    assert_eq!(updated.description.as_deref(), Some("things to do"));
    assert_eq!(t.version().await, before.next());
}

/// Never answers.
#[derive(Debug)]
struct StuckPermissions;

#[async_trait]
impl PermissionsCacheInvalidator for StuckPermissions {
    async fn invalidate(
        &self,
        _workspace_id: WorkspaceId,
        _version: MetadataVersion,
    ) -> Result<(), CollaboratorError> {
        std::future::pending().await
    }
}

#[test_log::test(tokio::test)]
async fn test_stuck_collaborator_does_not_hold_the_workspace() {
    let t = TestService::with_collaborators(Collaborators {
        permissions: Arc::new(StuckPermissions),
        ..Collaborators::noop()
    })
    .await;

    tokio::time::timeout(Duration::from_secs(5), async {
        t.service
            .create_object(t.input("task", "tasks"))
            .await
            .unwrap();
        t.service
            .create_object(t.input("note", "notes"))
            .await
            .unwrap();
    })
    .await
    .expect("mutations waited for the permissions cache");
    // one invalidation per version never finishes
    tokio::time::timeout(Duration::from_secs(5), async {
        while t.service.post_commit().pending() > 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("other post-commit tasks never finished");
    assert_eq!(t.service.post_commit().pending(), 3);

    t.service.post_commit().shutdown().await;
    assert_eq!(t.service.post_commit().pending(), 0);
}
