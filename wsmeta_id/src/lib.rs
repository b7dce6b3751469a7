//! Identifiers for the rows of the workspace metadata catalog.
//!
//! Every identifier wraps a [`Uuid`]. New identifiers are UUIDv7, so sorting a set of
//! identifiers orders them by creation time, which is what the migration planner relies on when
//! it needs a stable order for relations.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Identifies a tenant. All catalog rows are scoped by it.
    WorkspaceId
);
uuid_identifier!(ObjectId);
uuid_identifier!(FieldId);
uuid_identifier!(RelationId);
uuid_identifier!(IndexId);
