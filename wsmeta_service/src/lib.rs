//! The object metadata mutation service.
//!
//! [`ObjectMetadataService`] is the entry point: it validates a requested change against the
//! current [`MetadataSnapshot`](wsmeta_catalog::MetadataSnapshot) of the workspace, migrates the
//! physical schema, commits the catalog rows, bumps the workspace's metadata version and then
//! notifies the collaborators that keep derived state in step.

pub mod collaborators;
pub mod defaults;
pub mod error;
pub mod locks;
pub mod post_commit;
pub mod service;
pub mod standard;

pub use collaborators::Collaborators;
pub use collaborators::PrimaryKeySettings;
pub use error::ErrorKind;
pub use error::MetadataError;
pub use error::Result;
pub use post_commit::RetryPolicy;
pub use service::CreateObjectInput;
pub use service::ObjectFilter;
pub use service::ObjectMetadataService;
pub use service::ServiceArgs;
pub use service::UpdateObjectPayload;
pub use service::VersionUpdate;
