//! An in-memory physical schema, used by tests and the command line tool.
//!
//! It enforces the preconditions a PostgreSQL database would: foreign keys and indexes need
//! their columns, a referenced table cannot be dropped, names are unique where the database
//! requires them to be.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use tracing::warn;
use wsmeta_id::WorkspaceId;

use crate::executor::PhysicalSchemaExecutor;
use crate::executor::SchemaExecutionError;
use crate::step::AppliedSteps;
use crate::step::ColumnDefinition;
use crate::step::ColumnType;
use crate::step::ForeignKey;
use crate::step::IndexDefinition;
use crate::step::MigrationPlan;
use crate::step::MigrationStep;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub columns: Vec<ColumnDefinition>,
    /// Keyed on constraint name.
    pub foreign_keys: BTreeMap<String, ForeignKey>,
    /// Keyed on index name.
    pub indexes: BTreeMap<String, IndexDefinition>,
}

impl TableShape {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Why `column` cannot be dropped or renamed, if something depends on it.
    fn column_dependent(&self, column: &str) -> Option<String> {
        if let Some(fk) = self.foreign_keys.values().find(|fk| fk.column == column) {
            return Some(format!("constraint {} depends on it", fk.name));
        }
        if let Some(index) = self
            .indexes
            .values()
            .find(|i| i.columns.iter().any(|c| c == column))
        {
            return Some(format!("index {} depends on it", index.name));
        }
        self.columns.iter().find_map(|c| match &c.column_type {
            ColumnType::TsVector { source_columns } if source_columns.iter().any(|s| s == column) => {
                Some(format!("generated column {} depends on it", c.name))
            }
            _ => None,
        })
    }
}

/// Tables and enum types of one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhysicalSchema {
    pub tables: BTreeMap<String, TableShape>,
    /// Enum type name to its values.
    pub enum_types: BTreeMap<String, Vec<String>>,
}

impl PhysicalSchema {
    pub fn table(&self, name: &str) -> Option<&TableShape> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableShape, String> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| format!("table {name} does not exist"))
    }

    fn has_index(&self, name: &str) -> bool {
        self.tables.values().any(|t| t.indexes.contains_key(name))
    }

    fn enum_type_in_use(&self, type_name: &str) -> bool {
        self.tables
            .values()
            .flat_map(|t| t.columns.iter())
            .any(|c| c.column_type.enum_type_name() == Some(type_name))
    }

    /// Apply one step, or explain why the database would reject it.
    pub fn apply(&mut self, step: &MigrationStep) -> Result<(), String> {
        match step {
            MigrationStep::CreateTable { table } => {
                if self.has_table(table) {
                    return Err(format!("table {table} already exists"));
                }
                self.tables.insert(table.clone(), TableShape::default());
            }
            MigrationStep::DropTable { table, if_exists } => {
                if !self.has_table(table) {
                    return if *if_exists {
                        Ok(())
                    } else {
                        Err(format!("table {table} does not exist"))
                    };
                }
                let referenced_by = self
                    .tables
                    .iter()
                    .filter(|(name, _)| *name != table)
                    .flat_map(|(_, t)| t.foreign_keys.values())
                    .find(|fk| fk.referenced_table == *table);
                if let Some(fk) = referenced_by {
                    return Err(format!(
                        "table {table} is referenced by constraint {} on {}",
                        fk.name, fk.table
                    ));
                }
                if let Some(shape) = self.tables.remove(table) {
                    for column in &shape.columns {
                        if let Some(type_name) = column.column_type.enum_type_name() {
                            if !self.enum_type_in_use(type_name) {
                                self.enum_types.remove(type_name);
                            }
                        }
                    }
                }
            }
            MigrationStep::RenameTable { from, to } => {
                if self.has_table(to) {
                    return Err(format!("table {to} already exists"));
                }
                let mut shape = self
                    .tables
                    .remove(from)
                    .ok_or_else(|| format!("table {from} does not exist"))?;
                for fk in shape.foreign_keys.values_mut() {
                    fk.table = to.clone();
                }
                self.tables.insert(to.clone(), shape);
                for fk in self
                    .tables
                    .values_mut()
                    .flat_map(|t| t.foreign_keys.values_mut())
                {
                    if fk.referenced_table == *from {
                        fk.referenced_table = to.clone();
                    }
                }
            }
            MigrationStep::AddColumn { table, column } => {
                let shape = self.table_mut(table)?;
                if shape.has_column(&column.name) {
                    return Err(format!("column {table}.{} already exists", column.name));
                }
                if let ColumnType::TsVector { source_columns } = &column.column_type {
                    if let Some(missing) = source_columns.iter().find(|c| !shape.has_column(c)) {
                        return Err(format!("generated column source {table}.{missing} does not exist"));
                    }
                }
                shape.columns.push(column.clone());
                if let ColumnType::Enum { type_name, values }
                | ColumnType::EnumArray { type_name, values } = &column.column_type
                {
                    match self.enum_types.get(type_name) {
                        Some(existing) if existing != values => {
                            return Err(format!("type {type_name} already exists"));
                        }
                        Some(_) => {}
                        None => {
                            self.enum_types.insert(type_name.clone(), values.clone());
                        }
                    }
                }
            }
            MigrationStep::DropColumn {
                table,
                column,
                if_exists,
            } => {
                let Some(shape) = self.tables.get_mut(table) else {
                    return if *if_exists {
                        Ok(())
                    } else {
                        Err(format!("table {table} does not exist"))
                    };
                };
                let Some(position) = shape.columns.iter().position(|c| c.name == *column) else {
                    return if *if_exists {
                        Ok(())
                    } else {
                        Err(format!("column {table}.{column} does not exist"))
                    };
                };
                if let Some(reason) = shape.column_dependent(column) {
                    return Err(format!("cannot drop column {table}.{column}: {reason}"));
                }
                let dropped = shape.columns.remove(position);
                if let Some(type_name) = dropped.column_type.enum_type_name() {
                    if !self.enum_type_in_use(type_name) {
                        self.enum_types.remove(type_name);
                    }
                }
            }
            MigrationStep::RenameColumn { table, from, to } => {
                let shape = self.table_mut(table)?;
                if shape.has_column(to) {
                    return Err(format!("column {table}.{to} already exists"));
                }
                if let Some(fk) = shape.foreign_keys.values().find(|fk| fk.column == *from) {
                    return Err(format!(
                        "cannot rename column {table}.{from}: constraint {} depends on it",
                        fk.name
                    ));
                }
                let column = shape
                    .columns
                    .iter_mut()
                    .find(|c| c.name == *from)
                    .ok_or_else(|| format!("column {table}.{from} does not exist"))?;
                column.name = to.clone();
                for index in shape.indexes.values_mut() {
                    for c in index.columns.iter_mut().filter(|c| c.as_str() == from.as_str()) {
                        *c = to.clone();
                    }
                }
                for column in shape.columns.iter_mut() {
                    if let ColumnType::TsVector { source_columns } = &mut column.column_type {
                        for c in source_columns.iter_mut().filter(|c| c.as_str() == from.as_str()) {
                            *c = to.clone();
                        }
                    }
                }
            }
            MigrationStep::AddRelation { foreign_key } => {
                let referenced_ok = self
                    .table(&foreign_key.referenced_table)
                    .is_some_and(|t| t.has_column(&foreign_key.referenced_column));
                if !referenced_ok {
                    return Err(format!(
                        "referenced column {}.{} does not exist",
                        foreign_key.referenced_table, foreign_key.referenced_column
                    ));
                }
                let shape = self.table_mut(&foreign_key.table)?;
                if !shape.has_column(&foreign_key.column) {
                    return Err(format!(
                        "column {}.{} does not exist",
                        foreign_key.table, foreign_key.column
                    ));
                }
                if shape.foreign_keys.contains_key(&foreign_key.name) {
                    return Err(format!("constraint {} already exists", foreign_key.name));
                }
                shape
                    .foreign_keys
                    .insert(foreign_key.name.clone(), foreign_key.clone());
            }
            MigrationStep::DropRelation {
                table,
                constraint,
                if_exists,
            } => {
                let removed = self
                    .tables
                    .get_mut(table)
                    .and_then(|t| t.foreign_keys.remove(constraint));
                if removed.is_none() && !if_exists {
                    return Err(format!("constraint {constraint} on {table} does not exist"));
                }
            }
            MigrationStep::RecomputeEnum {
                table,
                column,
                from_type,
                to_type,
            } => {
                if self.enum_types.contains_key(to_type) {
                    return Err(format!("type {to_type} already exists"));
                }
                let values = self
                    .enum_types
                    .remove(from_type)
                    .ok_or_else(|| format!("type {from_type} does not exist"))?;
                self.enum_types.insert(to_type.clone(), values);
                let shape = self.table_mut(table)?;
                if !shape.has_column(column) {
                    return Err(format!("column {table}.{column} does not exist"));
                }
                for c in shape.columns.iter_mut() {
                    if let ColumnType::Enum { type_name, .. }
                    | ColumnType::EnumArray { type_name, .. } = &mut c.column_type
                    {
                        if type_name == from_type {
                            *type_name = to_type.clone();
                        }
                    }
                }
            }
            MigrationStep::CreateIndex { table, index } => {
                if self.has_index(&index.name) {
                    return Err(format!("index {} already exists", index.name));
                }
                let shape = self.table_mut(table)?;
                if let Some(missing) = index.columns.iter().find(|c| !shape.has_column(c)) {
                    return Err(format!("column {table}.{missing} does not exist"));
                }
                shape.indexes.insert(index.name.clone(), index.clone());
            }
            MigrationStep::DropIndex {
                table,
                name,
                if_exists,
            } => {
                let removed = self
                    .tables
                    .get_mut(table)
                    .and_then(|t| t.indexes.remove(name));
                if removed.is_none() && !if_exists {
                    return Err(format!("index {name} on {table} does not exist"));
                }
            }
        }
        Ok(())
    }
}

/// A [`PhysicalSchemaExecutor`] that keeps one [`PhysicalSchema`] per workspace in memory and
/// records every plan it commits.
#[derive(Debug, Default)]
pub struct InMemorySchemaExecutor {
    schemas: Mutex<HashMap<WorkspaceId, PhysicalSchema>>,
    history: Mutex<HashMap<WorkspaceId, Vec<AppliedSteps>>>,
    failures: Mutex<HashMap<WorkspaceId, usize>>,
}

impl InMemorySchemaExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self, workspace_id: WorkspaceId) -> PhysicalSchema {
        self.schemas
            .lock()
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every committed plan of the workspace, oldest first.
    pub fn history(&self, workspace_id: WorkspaceId) -> Vec<AppliedSteps> {
        self.history
            .lock()
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next plan executed for the workspace fail at step `index`.
    pub fn fail_at_step(&self, workspace_id: WorkspaceId, index: usize) {
        self.failures.lock().insert(workspace_id, index);
    }
}

#[async_trait]
impl PhysicalSchemaExecutor for InMemorySchemaExecutor {
    async fn execute(&self, plan: &MigrationPlan) -> Result<AppliedSteps, SchemaExecutionError> {
        let workspace_id = plan.workspace_id();
        let fail_at = self.failures.lock().remove(&workspace_id);

        let mut schemas = self.schemas.lock();
        let mut staged = schemas.get(&workspace_id).cloned().unwrap_or_default();
        for (index, step) in plan.steps().iter().enumerate() {
            let result = if fail_at == Some(index) {
                Err("injected failure".to_string())
            } else {
                staged.apply(step)
            };
            if let Err(reason) = result {
                warn!(%workspace_id, index, %step, %reason, "migration step failed");
                return Err(SchemaExecutionError::StepFailed {
                    index,
                    step: Box::new(step.clone()),
                    reason,
                });
            }
        }
        schemas.insert(workspace_id, staged);
        drop(schemas);

        let applied = AppliedSteps::new(plan.steps().to_vec());
        self.history
            .lock()
            .entry(workspace_id)
            .or_default()
            .push(applied.clone());
        debug!(%workspace_id, steps = applied.len(), "applied migration plan");
        Ok(applied)
    }
}
