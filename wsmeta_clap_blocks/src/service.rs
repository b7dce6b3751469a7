//! CLI config for the object metadata service.

use wsmeta_catalog::CatalogLimits;
use wsmeta_service::RetryPolicy;
use wsmeta_service::ServiceArgs;

/// CLI config for the limits, timeouts and retries of metadata mutations.
#[derive(Debug, Clone, clap::Parser)]
pub struct MetadataServiceConfig {
    /// Maximum number of objects, active or not, in one workspace.
    #[clap(
        long = "max-objects-per-workspace",
        env = "WSMETA_MAX_OBJECTS_PER_WORKSPACE",
        default_value_t = CatalogLimits::DEFAULT_MAX_OBJECTS_PER_WORKSPACE,
        action
    )]
    pub max_objects_per_workspace: usize,

    /// Maximum number of fields of one object, including relation fields.
    #[clap(
        long = "max-fields-per-object",
        env = "WSMETA_MAX_FIELDS_PER_OBJECT",
        default_value_t = CatalogLimits::DEFAULT_MAX_FIELDS_PER_OBJECT,
        action
    )]
    pub max_fields_per_object: usize,

    /// How long a mutation waits for another mutation of the same workspace to finish before
    /// giving up.
    #[clap(
        long = "lock-timeout",
        env = "WSMETA_LOCK_TIMEOUT",
        default_value = "30s",
        action
    )]
    pub lock_timeout: humantime::Duration,

    /// Attempts per post-commit task (search index, views, permissions), counting the first.
    #[clap(
        long = "post-commit-max-attempts",
        env = "WSMETA_POST_COMMIT_MAX_ATTEMPTS",
        default_value_t = RetryPolicy::DEFAULT_MAX_ATTEMPTS,
        action
    )]
    pub post_commit_max_attempts: u32,

    /// Delay before the first retry of a failed post-commit task. Later retries wait
    /// proportionally longer.
    #[clap(
        long = "post-commit-backoff",
        env = "WSMETA_POST_COMMIT_BACKOFF",
        default_value = "200ms",
        action
    )]
    pub post_commit_backoff: humantime::Duration,

    /// Standard objects that every custom object is related to, comma separated.
    #[clap(
        long = "relation-targets",
        env = "WSMETA_RELATION_TARGETS",
        default_value = "favorite,attachment,timelineActivity,noteTarget,taskTarget",
        value_delimiter = ',',
        action
    )]
    pub relation_targets: Vec<String>,
}

impl MetadataServiceConfig {
    pub fn limits(&self) -> CatalogLimits {
        CatalogLimits {
            max_objects_per_workspace: self.max_objects_per_workspace,
            max_fields_per_object: self.max_fields_per_object,
        }
    }

    pub fn to_service_args(&self) -> ServiceArgs {
        ServiceArgs {
            limits: self.limits(),
            lock_timeout: self.lock_timeout.into(),
            post_commit_retry: RetryPolicy {
                max_attempts: self.post_commit_max_attempts,
                backoff: self.post_commit_backoff.into(),
            },
            relation_targets: self
                .relation_targets
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}
