//! Relation bookkeeping for object creation, renames and deletion.

use hashbrown::HashSet;
use tracing::debug;
use wsmeta_catalog::FieldMetadata;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::MetadataSnapshot;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::OnDelete;
use wsmeta_catalog::RelationDirection;
use wsmeta_catalog::RelationMetadata;
use wsmeta_catalog::RelationRef;
use wsmeta_catalog::compute_foreign_key_name;
use wsmeta_catalog::compute_join_column_name;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;
use wsmeta_id::RelationId;

use crate::PlanningError;
use crate::Result;
use crate::step::ColumnDefinition;
use crate::step::ColumnType;
use crate::step::ForeignKey;

/// A relation created together with a new object.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRelation {
    pub relation: RelationMetadata,
    /// The one-to-many side, on the new object.
    pub source_field: FieldMetadata,
    /// The many-to-one side, on an existing object.
    pub target_field: FieldMetadata,
    pub join_column: ColumnDefinition,
    pub foreign_key: ForeignKey,
}

/// A counterpart field named after an object that is being renamed.
#[derive(Debug, Clone, PartialEq)]
pub struct RenamedCounterpart {
    pub relation_id: RelationId,
    /// The counterpart field as it will be after the rename.
    pub field: FieldMetadata,
    pub table: String,
    pub from_column: String,
    pub to_column: String,
    pub drop_constraint: String,
    pub foreign_key: ForeignKey,
}

/// A foreign key whose constraint name changes because its table is renamed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReboundForeignKey {
    pub relation_id: RelationId,
    pub drop_constraint: String,
    pub foreign_key: ForeignKey,
}

/// A relation going away with the object it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedRelation {
    pub relation_id: RelationId,
    /// The field on the other object, if it is still there.
    pub counterpart_field_id: Option<FieldId>,
    /// `(table, constraint)` of the foreign key to drop.
    pub drop_constraint: Option<(String, String)>,
    /// `(table, column)` of a join column on the other object's table.
    pub drop_column: Option<(String, String)>,
}

/// What has to happen to relations for one object mutation. Every list is ordered by relation
/// id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationDelta {
    pub created: Vec<CreatedRelation>,
    pub renamed: Vec<RenamedCounterpart>,
    pub rebound: Vec<ReboundForeignKey>,
    pub removed: Vec<RemovedRelation>,
}

impl RelationDelta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.renamed.is_empty()
            && self.rebound.is_empty()
            && self.removed.is_empty()
    }

    /// Fields of other objects that are created or changed.
    pub fn counterpart_fields_to_save(&self) -> Vec<FieldMetadata> {
        self.created
            .iter()
            .map(|c| c.target_field.clone())
            .chain(self.renamed.iter().map(|r| r.field.clone()))
            .collect()
    }

    pub fn counterpart_fields_to_delete(&self) -> Vec<FieldId> {
        self.removed
            .iter()
            .filter_map(|r| r.counterpart_field_id)
            .collect()
    }

    pub fn relations_to_save(&self) -> Vec<RelationMetadata> {
        self.created.iter().map(|c| c.relation).collect()
    }

    pub fn relations_to_delete(&self) -> Vec<RelationId> {
        self.removed.iter().map(|r| r.relation_id).collect()
    }
}

/// Keeps both sides of every relation consistent with the objects they connect.
#[derive(Debug, Clone)]
pub struct RelationManager {
    relation_targets: Vec<String>,
    on_delete: OnDelete,
}

impl RelationManager {
    /// Standard objects every custom object gets a relation with.
    pub const DEFAULT_RELATION_TARGETS: &[&str] = &[
        "favorite",
        "attachment",
        "timelineActivity",
        "noteTarget",
        "taskTarget",
    ];

    pub fn new(relation_targets: Vec<String>) -> Self {
        Self {
            relation_targets,
            on_delete: OnDelete::default(),
        }
    }

    pub fn relation_targets(&self) -> &[String] {
        &self.relation_targets
    }

    pub fn plan_relations_for_create(
        &self,
        snapshot: &MetadataSnapshot,
        object: &ObjectMetadata,
    ) -> Result<RelationDelta> {
        for field in object.relation_fields() {
            if let Some(relation) = &field.relation {
                let resolves = object.fields.contains_key(&relation.target_field_id)
                    || snapshot.field(relation.target_field_id).is_some();
                if !resolves {
                    return Err(PlanningError::DanglingRelation {
                        field_id: field.id,
                        target_field_id: relation.target_field_id,
                    });
                }
            }
        }

        let table = object.target_table_name();
        let mut created = vec![];
        for target_name in &self.relation_targets {
            let Some(target) = snapshot.active_object_by_name(target_name) else {
                continue;
            };
            if target.id == object.id {
                continue;
            }

            let source_name = target.name_plural.clone();
            let target_field_name = object.name_singular.clone();
            if object.field_by_name(&source_name).is_some() {
                return Err(PlanningError::FieldNameCollision {
                    object: object.name_singular.clone(),
                    field: source_name,
                });
            }
            if target.field_by_name(&target_field_name).is_some() {
                return Err(PlanningError::FieldNameCollision {
                    object: target.name_singular.clone(),
                    field: target_field_name,
                });
            }

            let relation_id = RelationId::new();
            let source_field_id = FieldId::new();
            let target_field_id = FieldId::new();
            let join_column = compute_join_column_name(&target_field_name);
            let target_table = target.target_table_name();

            let source_field = relation_field(
                source_field_id,
                object,
                source_name,
                target.label_plural.clone(),
                RelationRef {
                    relation_id,
                    direction: RelationDirection::OneToMany,
                    target_object_id: target.id,
                    target_field_id,
                    join_column: None,
                    on_delete: self.on_delete,
                },
            );
            let target_field = relation_field(
                target_field_id,
                target,
                target_field_name,
                object.label_singular.clone(),
                RelationRef {
                    relation_id,
                    direction: RelationDirection::ManyToOne,
                    target_object_id: object.id,
                    target_field_id: source_field_id,
                    join_column: Some(join_column.clone()),
                    on_delete: self.on_delete,
                },
            );

            created.push(CreatedRelation {
                relation: RelationMetadata {
                    id: relation_id,
                    workspace_id: object.workspace_id,
                    source_object_id: object.id,
                    source_field_id,
                    target_object_id: target.id,
                    target_field_id,
                    on_delete: self.on_delete,
                },
                source_field,
                target_field,
                join_column: ColumnDefinition::new(&join_column, ColumnType::Uuid, true),
                foreign_key: ForeignKey {
                    name: compute_foreign_key_name(&target_table, &join_column),
                    table: target_table,
                    column: join_column,
                    referenced_table: table.clone(),
                    referenced_column: "id".to_string(),
                    on_delete: self.on_delete,
                },
            });
        }

        created.sort_by_key(|c| c.relation.id);
        Ok(RelationDelta {
            created,
            ..Default::default()
        })
    }

    /// Only renames that move the object to another table touch relations.
    pub fn plan_relations_for_update(
        &self,
        snapshot: &MetadataSnapshot,
        current: &ObjectMetadata,
        proposed: &ObjectMetadata,
    ) -> Result<RelationDelta> {
        let old_table = current.target_table_name();
        let new_table = proposed.target_table_name();
        if old_table == new_table {
            return Ok(RelationDelta::default());
        }
        let table_of = |object: &ObjectMetadata| {
            if object.id == current.id {
                new_table.clone()
            } else {
                object.target_table_name()
            }
        };

        let mut delta = RelationDelta::default();
        for field in current.relation_fields() {
            let Some(relation) = &field.relation else {
                continue;
            };
            let Some((counterpart_object, counterpart)) =
                snapshot.field(relation.target_field_id)
            else {
                return Err(PlanningError::DanglingRelation {
                    field_id: field.id,
                    target_field_id: relation.target_field_id,
                });
            };

            match relation.direction {
                RelationDirection::ManyToOne => {
                    let Some(column) = relation.join_column.clone() else {
                        continue;
                    };
                    delta.rebound.push(ReboundForeignKey {
                        relation_id: relation.relation_id,
                        drop_constraint: compute_foreign_key_name(&old_table, &column),
                        foreign_key: ForeignKey {
                            name: compute_foreign_key_name(&new_table, &column),
                            table: new_table.clone(),
                            column,
                            referenced_table: table_of(counterpart_object),
                            referenced_column: "id".to_string(),
                            on_delete: relation.on_delete,
                        },
                    });
                }
                RelationDirection::OneToMany => {
                    // self relations are handled from their many-to-one side
                    if counterpart_object.id == current.id
                        || counterpart.name != current.name_singular
                    {
                        continue;
                    }
                    let Some(counterpart_relation) = &counterpart.relation else {
                        return Err(PlanningError::DanglingRelation {
                            field_id: counterpart.id,
                            target_field_id: field.id,
                        });
                    };
                    let Some(from_column) = counterpart_relation.join_column.clone() else {
                        continue;
                    };

                    let new_name = proposed.name_singular.clone();
                    if counterpart_object
                        .fields
                        .values()
                        .any(|f| f.id != counterpart.id && f.name == new_name)
                    {
                        return Err(PlanningError::FieldNameCollision {
                            object: counterpart_object.name_singular.clone(),
                            field: new_name,
                        });
                    }
                    let to_column = compute_join_column_name(&new_name);
                    let table = counterpart_object.target_table_name();

                    let mut renamed = counterpart.clone();
                    renamed.name = new_name;
                    renamed.label = proposed.label_singular.clone();
                    renamed.relation = Some(RelationRef {
                        join_column: Some(to_column.clone()),
                        ..counterpart_relation.clone()
                    });

                    delta.renamed.push(RenamedCounterpart {
                        relation_id: relation.relation_id,
                        field: renamed,
                        drop_constraint: compute_foreign_key_name(&table, &from_column),
                        foreign_key: ForeignKey {
                            name: compute_foreign_key_name(&table, &to_column),
                            table: table.clone(),
                            column: to_column.clone(),
                            referenced_table: new_table.clone(),
                            referenced_column: "id".to_string(),
                            on_delete: counterpart_relation.on_delete,
                        },
                        table,
                        from_column,
                        to_column,
                    });
                }
            }
        }

        delta.renamed.sort_by_key(|r| r.relation_id);
        delta.rebound.sort_by_key(|r| r.relation_id);
        debug!(
            object = %current.name_singular,
            renamed = delta.renamed.len(),
            rebound = delta.rebound.len(),
            "planned relation updates for table rename"
        );
        Ok(delta)
    }

    /// Counterpart fields that are already gone are not deleted again, and the physical steps
    /// all tolerate absence, so deleting an object that a previous attempt partially removed
    /// still succeeds.
    pub fn plan_relations_for_delete(
        &self,
        snapshot: &MetadataSnapshot,
        object: &ObjectMetadata,
    ) -> Result<RelationDelta> {
        let table = object.target_table_name();
        let mut seen = HashSet::new();
        let mut removed = vec![];

        for field in object.relation_fields() {
            let Some(relation) = &field.relation else {
                continue;
            };
            if !seen.insert(relation.relation_id) {
                continue;
            }
            let counterpart = snapshot
                .field(relation.target_field_id)
                .filter(|(owner, _)| owner.id != object.id);

            let removal = match (relation.direction, counterpart) {
                (RelationDirection::ManyToOne, counterpart) => RemovedRelation {
                    relation_id: relation.relation_id,
                    counterpart_field_id: counterpart.map(|(_, f)| f.id),
                    drop_constraint: relation
                        .join_column
                        .as_ref()
                        .map(|c| (table.clone(), compute_foreign_key_name(&table, c))),
                    drop_column: None,
                },
                (RelationDirection::OneToMany, Some((owner, counterpart))) => {
                    counterpart_removal(relation.relation_id, owner, counterpart)
                }
                (RelationDirection::OneToMany, None) => {
                    debug!(
                        relation_id = %relation.relation_id,
                        "relation counterpart already removed"
                    );
                    orphaned_removal(
                        relation.relation_id,
                        snapshot,
                        object,
                        Some(relation.target_object_id),
                    )
                }
            };
            removed.push(removal);
        }

        // relation rows whose field on this object is already gone
        for relation in snapshot.relations_touching(object.id) {
            if !seen.insert(relation.id) {
                continue;
            }
            let other_field = if relation.source_object_id == object.id {
                relation.target_field_id
            } else {
                relation.source_field_id
            };
            let removal = match snapshot
                .field(other_field)
                .filter(|(owner, _)| owner.id != object.id)
            {
                Some((owner, counterpart)) => {
                    counterpart_removal(relation.id, owner, counterpart)
                }
                // the foreign key lives on the other object's table only if this object is
                // the one-to-many side
                None => orphaned_removal(
                    relation.id,
                    snapshot,
                    object,
                    (relation.source_object_id == object.id).then_some(relation.target_object_id),
                ),
            };
            removed.push(removal);
        }

        removed.sort_by_key(|r| r.relation_id);
        Ok(RelationDelta {
            removed,
            ..Default::default()
        })
    }
}

impl Default for RelationManager {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_RELATION_TARGETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

/// Removal of a counterpart field on another object, with its join column if it has one.
fn counterpart_removal(
    relation_id: RelationId,
    owner: &ObjectMetadata,
    counterpart: &FieldMetadata,
) -> RemovedRelation {
    let table = owner.target_table_name();
    let join_column = counterpart
        .relation
        .as_ref()
        .filter(|r| r.direction == RelationDirection::ManyToOne)
        .and_then(|r| r.join_column.clone());
    RemovedRelation {
        relation_id,
        counterpart_field_id: Some(counterpart.id),
        drop_constraint: join_column
            .as_ref()
            .map(|c| (table.clone(), compute_foreign_key_name(&table, c))),
        drop_column: join_column.map(|c| (table, c)),
    }
}

/// Removal of a relation whose field on `host_object_id` is already gone. The join column may
/// still be there, under the name the field had, so it is dropped if it exists.
fn orphaned_removal(
    relation_id: RelationId,
    snapshot: &MetadataSnapshot,
    object: &ObjectMetadata,
    host_object_id: Option<ObjectId>,
) -> RemovedRelation {
    let host = host_object_id
        .and_then(|id| snapshot.object(id))
        .filter(|host| host.id != object.id);
    let (drop_constraint, drop_column) = match host {
        Some(host) => {
            let table = host.target_table_name();
            let column = compute_join_column_name(&object.name_singular);
            (
                Some((table.clone(), compute_foreign_key_name(&table, &column))),
                Some((table, column)),
            )
        }
        None => (None, None),
    };
    RemovedRelation {
        relation_id,
        counterpart_field_id: None,
        drop_constraint,
        drop_column,
    }
}

fn relation_field(
    id: FieldId,
    owner: &ObjectMetadata,
    name: String,
    label: String,
    relation: RelationRef,
) -> FieldMetadata {
    FieldMetadata {
        id,
        object_id: owner.id,
        workspace_id: owner.workspace_id,
        name,
        label,
        field_type: FieldType::Relation,
        is_custom: false,
        is_system: true,
        is_nullable: true,
        is_active: true,
        relation: Some(relation),
    }
}
