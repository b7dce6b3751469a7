//! Ordered migration plans for object creation, update and deletion.

use tracing::debug;
use wsmeta_catalog::ID_FIELD_NAME;
use wsmeta_catalog::IndexMetadata;
use wsmeta_catalog::IndexType;
use wsmeta_catalog::MetadataSnapshot;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::RelationDirection;
use wsmeta_catalog::SEARCH_VECTOR_FIELD_NAME;
use wsmeta_catalog::compute_foreign_key_name;
use wsmeta_id::RelationId;

use crate::PlanningError;
use crate::Result;
use crate::column::columns_for_field;
use crate::column::columns_for_object;
use crate::relation::RelationDelta;
use crate::step::ForeignKey;
use crate::step::MigrationPlan;
use crate::step::MigrationStep;

/// Side effects of a plan that the catalog and derived artifacts need to follow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanEffects {
    /// `(from, to)` when the object moves to another table.
    pub renamed_table: Option<(String, String)>,
    /// Saved views show the plural label and icon of their object.
    pub views_sync_required: bool,
    /// Index rows created or renamed by the plan.
    pub indexes: Vec<IndexMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMigration {
    pub plan: MigrationPlan,
    pub effects: PlanEffects,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationPlanner;

impl MigrationPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan the physical changes for moving an object from `current` to `proposed`: creation
    /// when there is no current object, deletion when there is no proposed one.
    pub fn plan(
        &self,
        snapshot: &MetadataSnapshot,
        current: Option<&ObjectMetadata>,
        proposed: Option<&ObjectMetadata>,
        delta: &RelationDelta,
    ) -> Result<PlannedMigration> {
        let planned = match (current, proposed) {
            (None, Some(proposed)) => self.plan_create(snapshot, proposed, delta)?,
            (Some(current), Some(proposed)) => {
                self.plan_update(snapshot, current, proposed, delta)?
            }
            (Some(current), None) => self.plan_delete(snapshot, current, delta)?,
            (None, None) => return Err(PlanningError::NothingToPlan),
        };
        planned.plan.check_dependency_order()?;
        debug!(
            workspace_id = %snapshot.workspace_id(),
            steps = planned.plan.len(),
            "planned schema migration"
        );
        Ok(planned)
    }

    pub fn plan_create(
        &self,
        snapshot: &MetadataSnapshot,
        object: &ObjectMetadata,
        delta: &RelationDelta,
    ) -> Result<PlannedMigration> {
        check_table_collision(snapshot, object)?;
        let table = object.target_table_name();
        let mut plan = MigrationPlan::new(snapshot.workspace_id());

        plan.push(MigrationStep::CreateTable {
            table: table.clone(),
        });
        plan.extend(
            columns_for_object(object)
                .into_iter()
                .map(|column| MigrationStep::AddColumn {
                    table: table.clone(),
                    column,
                }),
        );
        plan.extend(delta.created.iter().map(|c| MigrationStep::AddColumn {
            table: c.foreign_key.table.clone(),
            column: c.join_column.clone(),
        }));

        // foreign keys the new object holds itself, then the ones pointing at it
        let mut foreign_keys: Vec<(RelationId, ForeignKey)> = object
            .relation_fields()
            .into_iter()
            .filter_map(|field| {
                let relation = field.relation.as_ref()?;
                if relation.direction != RelationDirection::ManyToOne {
                    return None;
                }
                let column = relation.join_column.clone()?;
                let referenced_table = if relation.target_object_id == object.id {
                    table.clone()
                } else {
                    snapshot.object(relation.target_object_id)?.target_table_name()
                };
                Some((
                    relation.relation_id,
                    ForeignKey {
                        name: compute_foreign_key_name(&table, &column),
                        table: table.clone(),
                        column,
                        referenced_table,
                        referenced_column: ID_FIELD_NAME.to_string(),
                        on_delete: relation.on_delete,
                    },
                ))
            })
            .collect();
        foreign_keys.extend(
            delta
                .created
                .iter()
                .map(|c| (c.relation.id, c.foreign_key.clone())),
        );
        foreign_keys.sort_by_key(|(id, _)| *id);
        plan.extend(
            foreign_keys
                .into_iter()
                .map(|(_, foreign_key)| MigrationStep::AddRelation { foreign_key }),
        );

        let indexes = default_indexes(object);
        plan.extend(indexes.iter().map(|index| MigrationStep::CreateIndex {
            table: table.clone(),
            index: index.into(),
        }));

        Ok(PlannedMigration {
            plan,
            effects: PlanEffects {
                indexes,
                ..Default::default()
            },
        })
    }

    pub fn plan_update(
        &self,
        snapshot: &MetadataSnapshot,
        current: &ObjectMetadata,
        proposed: &ObjectMetadata,
        delta: &RelationDelta,
    ) -> Result<PlannedMigration> {
        let mut plan = MigrationPlan::new(snapshot.workspace_id());
        let mut effects = PlanEffects {
            views_sync_required: current.label_plural != proposed.label_plural
                || current.icon != proposed.icon,
            ..Default::default()
        };

        let old_table = current.target_table_name();
        let new_table = proposed.target_table_name();
        if old_table == new_table {
            return Ok(PlannedMigration { plan, effects });
        }
        check_table_collision(snapshot, proposed)?;

        plan.push(MigrationStep::RenameTable {
            from: old_table.clone(),
            to: new_table.clone(),
        });

        let mut relation_steps: Vec<(RelationId, Vec<MigrationStep>)> = delta
            .renamed
            .iter()
            .map(|r| {
                (
                    r.relation_id,
                    vec![
                        MigrationStep::DropRelation {
                            table: r.table.clone(),
                            constraint: r.drop_constraint.clone(),
                            if_exists: false,
                        },
                        MigrationStep::RenameColumn {
                            table: r.table.clone(),
                            from: r.from_column.clone(),
                            to: r.to_column.clone(),
                        },
                        MigrationStep::AddRelation {
                            foreign_key: r.foreign_key.clone(),
                        },
                    ],
                )
            })
            .chain(delta.rebound.iter().map(|r| {
                (
                    r.relation_id,
                    vec![
                        MigrationStep::DropRelation {
                            table: new_table.clone(),
                            constraint: r.drop_constraint.clone(),
                            if_exists: false,
                        },
                        MigrationStep::AddRelation {
                            foreign_key: r.foreign_key.clone(),
                        },
                    ],
                )
            }))
            .collect();
        relation_steps.sort_by_key(|(id, _)| *id);
        plan.extend(relation_steps.into_iter().flat_map(|(_, steps)| steps));

        let old_columns = columns_for_object(current);
        for column in columns_for_object(proposed) {
            let Some(to_type) = column.column_type.enum_type_name() else {
                continue;
            };
            let from_type = old_columns
                .iter()
                .find(|c| c.name == column.name)
                .and_then(|c| c.column_type.enum_type_name());
            if let Some(from_type) = from_type.filter(|from| *from != to_type) {
                plan.push(MigrationStep::RecomputeEnum {
                    table: new_table.clone(),
                    column: column.name.clone(),
                    from_type: from_type.to_string(),
                    to_type: to_type.to_string(),
                });
            }
        }

        for index in snapshot.indexes_for(current.id) {
            let renamed = index.renamed_for(&new_table);
            if renamed.name == index.name {
                continue;
            }
            plan.push(MigrationStep::DropIndex {
                table: new_table.clone(),
                name: index.name.clone(),
                if_exists: false,
            });
            plan.push(MigrationStep::CreateIndex {
                table: new_table.clone(),
                index: (&renamed).into(),
            });
            effects.indexes.push(renamed);
        }

        effects.renamed_table = Some((old_table, new_table));
        Ok(PlannedMigration { plan, effects })
    }

    pub fn plan_delete(
        &self,
        snapshot: &MetadataSnapshot,
        object: &ObjectMetadata,
        delta: &RelationDelta,
    ) -> Result<PlannedMigration> {
        let mut plan = MigrationPlan::new(snapshot.workspace_id());
        plan.extend(delta.removed.iter().filter_map(|r| {
            let (table, constraint) = r.drop_constraint.clone()?;
            Some(MigrationStep::DropRelation {
                table,
                constraint,
                if_exists: true,
            })
        }));
        plan.extend(delta.removed.iter().filter_map(|r| {
            let (table, column) = r.drop_column.clone()?;
            Some(MigrationStep::DropColumn {
                table,
                column,
                if_exists: true,
            })
        }));
        plan.push(MigrationStep::DropTable {
            table: object.target_table_name(),
            if_exists: true,
        });
        Ok(PlannedMigration {
            plan,
            effects: PlanEffects::default(),
        })
    }

    /// Regenerate the search vector of `object` from its label identifier field.
    ///
    /// `indexes` are the object's index rows as they are after any rename in the same update.
    pub fn plan_search_vector_update(
        &self,
        object: &ObjectMetadata,
        indexes: &[IndexMetadata],
    ) -> MigrationPlan {
        let mut plan = MigrationPlan::new(object.workspace_id);
        let Some(search_field) = object.field_by_name(SEARCH_VECTOR_FIELD_NAME) else {
            return plan;
        };
        let table = object.target_table_name();
        let search_index = indexes
            .iter()
            .find(|i| i.columns.iter().any(|c| c == SEARCH_VECTOR_FIELD_NAME));

        if let Some(index) = search_index {
            plan.push(MigrationStep::DropIndex {
                table: table.clone(),
                name: index.name.clone(),
                if_exists: true,
            });
        }
        plan.push(MigrationStep::DropColumn {
            table: table.clone(),
            column: search_field.name.clone(),
            if_exists: true,
        });
        plan.extend(
            columns_for_field(object, search_field)
                .into_iter()
                .map(|column| MigrationStep::AddColumn {
                    table: table.clone(),
                    column,
                }),
        );
        if let Some(index) = search_index {
            plan.push(MigrationStep::CreateIndex {
                table,
                index: index.into(),
            });
        }
        plan
    }
}

fn check_table_collision(snapshot: &MetadataSnapshot, object: &ObjectMetadata) -> Result<()> {
    let table = object.target_table_name();
    let existing = snapshot
        .objects_with_table(&table, Some(object.id))
        .next()
        .map(|o| o.id);
    match existing {
        Some(existing_object_id) => Err(PlanningError::TargetTableCollision {
            table,
            existing_object_id,
        }),
        None => Ok(()),
    }
}

/// The search vector index of searchable objects and the label identifier index.
fn default_indexes(object: &ObjectMetadata) -> Vec<IndexMetadata> {
    let mut indexes = vec![];
    if object.is_searchable && object.field_by_name(SEARCH_VECTOR_FIELD_NAME).is_some() {
        indexes.push(IndexMetadata::new(
            object,
            vec![SEARCH_VECTOR_FIELD_NAME.to_string()],
            IndexType::Gin,
            false,
        ));
    }
    if let Some(field) = object
        .label_identifier_field()
        .filter(|f| f.name != ID_FIELD_NAME)
    {
        let columns: Vec<String> = columns_for_field(object, field)
            .into_iter()
            .map(|c| c.name)
            .collect();
        if !columns.is_empty() {
            indexes.push(IndexMetadata::new(object, columns, IndexType::Btree, false));
        }
    }
    indexes
}
