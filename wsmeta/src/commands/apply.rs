//! Runs a script of object mutations against in-memory adapters.
//!
//! A script is a JSON document:
//!
//! ```json
//! {
//!   "seedStandardObjects": true,
//!   "operations": [
//!     { "op": "create", "nameSingular": "task", "namePlural": "tasks",
//!       "labelSingular": "Task", "labelPlural": "Tasks" },
//!     { "op": "update", "object": "task",
//!       "changes": { "nameSingular": "job", "namePlural": "jobs" } },
//!     { "op": "delete", "object": "job" }
//!   ]
//! }
//! ```
//!
//! Objects are referred to by singular or plural name.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use wsmeta_catalog::InMemoryVersionManager;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::mem::MemMetadataStore;
use wsmeta_clap_blocks::service::MetadataServiceConfig;
use wsmeta_id::WorkspaceId;
use wsmeta_migration::AppliedSteps;
use wsmeta_migration::InMemorySchemaExecutor;
use wsmeta_migration::PhysicalSchema;
use wsmeta_service::Collaborators;
use wsmeta_service::CreateObjectInput;
use wsmeta_service::MetadataError;
use wsmeta_service::ObjectFilter;
use wsmeta_service::ObjectMetadataService;
use wsmeta_service::UpdateObjectPayload;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("error reading script: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation {index} failed: no object named \"{name}\"")]
    UnknownObject { index: usize, name: String },

    #[error("operation {index} failed: {source}")]
    Mutation {
        index: usize,
        #[source]
        source: MetadataError,
    },

    #[error("seeding standard objects failed: {0}")]
    Seed(#[source] MetadataError),

    #[error("reading objects failed: {0}")]
    Read(#[source] MetadataError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Parser)]
pub struct Config {
    /// Service limits, timeouts and retries
    #[clap(flatten)]
    service_config: MetadataServiceConfig,

    /// File path to load the mutation script from
    #[clap(short = 's', long = "script")]
    script_path: PathBuf,

    /// Print the applied migration steps of every operation
    #[clap(long = "show-steps", action)]
    show_steps: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Script {
    #[serde(default)]
    workspace_id: Option<WorkspaceId>,
    #[serde(default = "default_seed")]
    seed_standard_objects: bool,
    operations: Vec<Operation>,
}

fn default_seed() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub(crate) enum Operation {
    Create(CreateOperation),
    Update {
        object: String,
        changes: UpdateObjectPayload,
    },
    Delete {
        object: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateOperation {
    name_singular: String,
    name_plural: String,
    label_singular: String,
    label_plural: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    is_label_synced_with_name: bool,
    #[serde(default)]
    is_remote: bool,
}

impl CreateOperation {
    fn into_input(self, workspace_id: WorkspaceId) -> CreateObjectInput {
        CreateObjectInput {
            workspace_id,
            name_singular: self.name_singular,
            name_plural: self.name_plural,
            label_singular: self.label_singular,
            label_plural: self.label_plural,
            description: self.description,
            icon: self.icon,
            is_label_synced_with_name: self.is_label_synced_with_name,
            is_remote: self.is_remote,
            primary_key: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationOutcome {
    op: &'static str,
    object: String,
    version: MetadataVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<AppliedSteps>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScriptOutcome {
    workspace_id: WorkspaceId,
    operations: Vec<OperationOutcome>,
    objects: Vec<ObjectMetadata>,
    schema: PhysicalSchema,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let script = std::fs::read_to_string(&config.script_path)?;
    let script: Script = serde_json::from_str(&script)?;
    let outcome = run_script(&config.service_config, script, config.show_steps).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub(crate) async fn run_script(
    service_config: &MetadataServiceConfig,
    script: Script,
    show_steps: bool,
) -> Result<ScriptOutcome> {
    let executor = Arc::new(InMemorySchemaExecutor::new());
    let service = ObjectMetadataService::new(
        Arc::new(MemMetadataStore::new()),
        Arc::new(InMemoryVersionManager::new()),
        Arc::clone(&executor) as _,
        Collaborators::noop(),
        service_config.to_service_args(),
    );
    let workspace_id = script.workspace_id.unwrap_or_default();
    info!(%workspace_id, operations = script.operations.len(), "applying mutation script");

    if script.seed_standard_objects {
        service
            .seed_standard_objects(workspace_id)
            .await
            .map_err(Error::Seed)?;
    }

    let mut operations = Vec::with_capacity(script.operations.len());
    for (index, operation) in script.operations.into_iter().enumerate() {
        let plans_before = executor.history(workspace_id).len();
        let mutation_error = |source| Error::Mutation { index, source };
        let (op, object) = match operation {
            Operation::Create(create) => {
                let object = service
                    .create_object(create.into_input(workspace_id))
                    .await
                    .map_err(mutation_error)?;
                ("create", object)
            }
            Operation::Update { object, changes } => {
                let id = find_object(&service, workspace_id, index, &object).await?;
                let object = service
                    .update_object(workspace_id, id, changes)
                    .await
                    .map_err(mutation_error)?;
                ("update", object)
            }
            Operation::Delete { object } => {
                let id = find_object(&service, workspace_id, index, &object).await?;
                let object = service
                    .delete_object(workspace_id, id)
                    .await
                    .map_err(mutation_error)?;
                ("delete", object)
            }
        };

        let steps = show_steps.then(|| {
            executor
                .history(workspace_id)
                .get(plans_before)
                .cloned()
                .unwrap_or_default()
        });
        operations.push(OperationOutcome {
            op,
            object: object.name_singular.clone(),
            version: service
                .current_version(workspace_id)
                .await
                .map_err(mutation_error)?,
            steps,
        });
    }

    let objects = service
        .find_many_in_workspace(workspace_id, &ObjectFilter::default())
        .await
        .map_err(Error::Read)?
        .into_iter()
        .map(|o| o.as_ref().clone())
        .collect();
    service.post_commit().drained().await;
    service.post_commit().shutdown().await;

    Ok(ScriptOutcome {
        workspace_id,
        operations,
        objects,
        schema: executor.schema(workspace_id),
    })
}

async fn find_object(
    service: &ObjectMetadataService,
    workspace_id: WorkspaceId,
    index: usize,
    name: &str,
) -> Result<wsmeta_id::ObjectId> {
    service
        .find_one_in_workspace(workspace_id, &ObjectFilter::by_name(name))
        .await
        .map_err(|source| Error::Mutation { index, source })?
        .map(|o| o.id)
        .ok_or_else(|| Error::UnknownObject {
            index,
            name: name.to_string(),
        })
}
