//! Physical schema changes and the ordered plans that carry them.

use std::fmt::Display;

use hashbrown::HashMap;
use serde::Deserialize;
use serde::Serialize;
use wsmeta_catalog::IndexMetadata;
use wsmeta_catalog::IndexType;
use wsmeta_catalog::OnDelete;
use wsmeta_id::WorkspaceId;

use crate::PlanningError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    Uuid,
    Text,
    Float,
    Boolean,
    Timestamptz,
    Jsonb,
    /// Generated from the listed columns of the same table.
    TsVector { source_columns: Vec<String> },
    Enum { type_name: String, values: Vec<String> },
    EnumArray { type_name: String, values: Vec<String> },
}

impl ColumnType {
    pub fn enum_type_name(&self) -> Option<&str> {
        match self {
            Self::Enum { type_name, .. } | Self::EnumArray { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub is_nullable: bool,
    pub default: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            is_nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub index_type: IndexType,
    pub is_unique: bool,
}

impl From<&IndexMetadata> for IndexDefinition {
    fn from(index: &IndexMetadata) -> Self {
        Self {
            name: index.name.clone(),
            columns: index.columns.clone(),
            index_type: index.index_type,
            is_unique: index.is_unique,
        }
    }
}

/// One change to a workspace's physical schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MigrationStep {
    CreateTable {
        table: String,
    },
    DropTable {
        table: String,
        if_exists: bool,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        table: String,
        column: String,
        if_exists: bool,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AddRelation {
        foreign_key: ForeignKey,
    },
    DropRelation {
        table: String,
        constraint: String,
        if_exists: bool,
    },
    /// Rename the enum type behind `column` after the table it is named for changed.
    RecomputeEnum {
        table: String,
        column: String,
        from_type: String,
        to_type: String,
    },
    CreateIndex {
        table: String,
        index: IndexDefinition,
    },
    DropIndex {
        table: String,
        name: String,
        if_exists: bool,
    },
}

impl MigrationStep {
    /// Tables this step needs to exist (under that name) when it runs.
    fn required_tables(&self) -> Vec<&str> {
        match self {
            Self::CreateTable { .. } | Self::DropTable { .. } | Self::RenameTable { .. } => vec![],
            Self::AddRelation { foreign_key } => {
                vec![foreign_key.table.as_str(), foreign_key.referenced_table.as_str()]
            }
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::DropRelation { table, .. }
            | Self::RecomputeEnum { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. } => vec![table.as_str()],
        }
    }

    /// Columns this step needs to exist when it runs.
    fn required_columns(&self) -> Vec<(&str, &str)> {
        match self {
            Self::AddRelation { foreign_key } => {
                vec![(foreign_key.table.as_str(), foreign_key.column.as_str())]
            }
            Self::CreateIndex { table, index } => {
                index.columns.iter().map(|c| (table.as_str(), c.as_str())).collect()
            }
            Self::AddColumn { table, column } => match &column.column_type {
                ColumnType::TsVector { source_columns } => source_columns
                    .iter()
                    .map(|c| (table.as_str(), c.as_str()))
                    .collect(),
                _ => vec![],
            },
            _ => vec![],
        }
    }
}

impl Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateTable { table } => write!(f, "create table {table}"),
            Self::DropTable { table, .. } => write!(f, "drop table {table}"),
            Self::RenameTable { from, to } => write!(f, "rename table {from} to {to}"),
            Self::AddColumn { table, column } => write!(f, "add column {table}.{}", column.name),
            Self::DropColumn { table, column, .. } => write!(f, "drop column {table}.{column}"),
            Self::RenameColumn { table, from, to } => {
                write!(f, "rename column {table}.{from} to {to}")
            }
            Self::AddRelation { foreign_key } => write!(
                f,
                "add foreign key {} on {}.{} referencing {}",
                foreign_key.name, foreign_key.table, foreign_key.column, foreign_key.referenced_table
            ),
            Self::DropRelation {
                table, constraint, ..
            } => write!(f, "drop foreign key {constraint} on {table}"),
            Self::RecomputeEnum {
                table,
                column,
                from_type,
                to_type,
            } => write!(f, "recompute enum {table}.{column} from {from_type} to {to_type}"),
            Self::CreateIndex { table, index } => write!(f, "create index {} on {table}", index.name),
            Self::DropIndex { table, name, .. } => write!(f, "drop index {name} on {table}"),
        }
    }
}

/// An ordered list of [`MigrationStep`]s for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    workspace_id: WorkspaceId,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            steps: vec![],
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn push(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that no step runs before the tables and columns it needs are created, or after
    /// they are dropped or renamed away.
    pub fn check_dependency_order(&self) -> Result<(), PlanningError> {
        let mut created_at: HashMap<&str, usize> = HashMap::new();
        let mut gone_at: HashMap<&str, usize> = HashMap::new();
        let mut column_added_at: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                MigrationStep::CreateTable { table } => {
                    created_at.entry(table.as_str()).or_insert(i);
                }
                MigrationStep::RenameTable { from, to } => {
                    created_at.entry(to.as_str()).or_insert(i);
                    gone_at.entry(from.as_str()).or_insert(i);
                }
                MigrationStep::DropTable { table, .. } => {
                    gone_at.entry(table.as_str()).or_insert(i);
                }
                MigrationStep::AddColumn { table, column } => {
                    column_added_at
                        .entry((table.as_str(), column.name.as_str()))
                        .or_insert(i);
                }
                MigrationStep::RenameColumn { table, to, .. } => {
                    column_added_at
                        .entry((table.as_str(), to.as_str()))
                        .or_insert(i);
                }
                _ => {}
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            let violation = step.required_tables().into_iter().any(|table| {
                created_at.get(table).is_some_and(|&at| at > i)
                    || gone_at.get(table).is_some_and(|&at| at < i)
            }) || step
                .required_columns()
                .into_iter()
                .any(|column| column_added_at.get(&column).is_some_and(|&at| at > i));
            if violation {
                return Err(PlanningError::OrderViolation {
                    index: i,
                    step: step.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Extend<MigrationStep> for MigrationPlan {
    fn extend<T: IntoIterator<Item = MigrationStep>>(&mut self, iter: T) {
        self.steps.extend(iter);
    }
}

/// The steps a [`PhysicalSchemaExecutor`](crate::PhysicalSchemaExecutor) committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppliedSteps(Vec<MigrationStep>);

impl AppliedSteps {
    pub fn new(steps: Vec<MigrationStep>) -> Self {
        Self(steps)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationStep> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
