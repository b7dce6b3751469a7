//! Physical columns behind metadata fields.

use wsmeta_catalog::ACTOR_SOURCES;
use wsmeta_catalog::FieldMetadata;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::ID_FIELD_NAME;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::RATING_VALUES;
use wsmeta_catalog::RelationDirection;
use wsmeta_catalog::compute_enum_type_name;

use crate::step::ColumnDefinition;
use crate::step::ColumnType;

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// The columns storing `field` in `object`'s table. Composite types spread over several
/// columns, one-to-many relation fields have none.
pub fn columns_for_field(object: &ObjectMetadata, field: &FieldMetadata) -> Vec<ColumnDefinition> {
    let table = object.target_table_name();
    let name = field.name.as_str();
    let nullable = field.is_nullable;
    let enum_type = |column: &str| compute_enum_type_name(&table, column);

    match &field.field_type {
        FieldType::Uuid if name == ID_FIELD_NAME => {
            vec![ColumnDefinition::new(name, ColumnType::Uuid, false).with_default("gen_random_uuid()")]
        }
        FieldType::Uuid => vec![ColumnDefinition::new(name, ColumnType::Uuid, nullable)],
        FieldType::Text => vec![ColumnDefinition::new(name, ColumnType::Text, nullable)],
        FieldType::Number | FieldType::Position => {
            vec![ColumnDefinition::new(name, ColumnType::Float, nullable)]
        }
        FieldType::Boolean => vec![ColumnDefinition::new(name, ColumnType::Boolean, nullable)],
        FieldType::DateTime if nullable => {
            vec![ColumnDefinition::new(name, ColumnType::Timestamptz, true)]
        }
        FieldType::DateTime => {
            vec![ColumnDefinition::new(name, ColumnType::Timestamptz, false).with_default("now()")]
        }
        FieldType::RawJson => vec![ColumnDefinition::new(name, ColumnType::Jsonb, nullable)],
        FieldType::TsVector => vec![ColumnDefinition::new(
            name,
            ColumnType::TsVector {
                source_columns: search_source_columns(object),
            },
            true,
        )],
        FieldType::Select { options } => vec![ColumnDefinition::new(
            name,
            ColumnType::Enum {
                type_name: enum_type(name),
                values: options.clone(),
            },
            nullable,
        )],
        FieldType::MultiSelect { options } => vec![ColumnDefinition::new(
            name,
            ColumnType::EnumArray {
                type_name: enum_type(name),
                values: options.clone(),
            },
            nullable,
        )],
        FieldType::Rating => vec![ColumnDefinition::new(
            name,
            ColumnType::Enum {
                type_name: enum_type(name),
                values: owned(RATING_VALUES),
            },
            nullable,
        )],
        FieldType::Actor => {
            let source = format!("{name}Source");
            vec![
                ColumnDefinition::new(
                    &source,
                    ColumnType::Enum {
                        type_name: enum_type(&source),
                        values: owned(ACTOR_SOURCES),
                    },
                    false,
                )
                .with_default("'MANUAL'"),
                ColumnDefinition::new(format!("{name}WorkspaceMemberId"), ColumnType::Uuid, true),
                ColumnDefinition::new(format!("{name}Name"), ColumnType::Text, true),
                ColumnDefinition::new(format!("{name}Context"), ColumnType::Jsonb, true),
            ]
        }
        FieldType::FullName => vec![
            ColumnDefinition::new(format!("{name}FirstName"), ColumnType::Text, true),
            ColumnDefinition::new(format!("{name}LastName"), ColumnType::Text, true),
        ],
        FieldType::Relation => match &field.relation {
            Some(relation) if relation.direction == RelationDirection::ManyToOne => relation
                .join_column
                .iter()
                .map(|column| ColumnDefinition::new(column, ColumnType::Uuid, true))
                .collect(),
            _ => vec![],
        },
    }
}

/// Every column of every field of `object`, in field order.
pub fn columns_for_object(object: &ObjectMetadata) -> Vec<ColumnDefinition> {
    object
        .fields
        .values()
        .flat_map(|field| columns_for_field(object, field))
        .collect()
}

/// Names of the text columns a searchable field contributes to a search vector.
pub fn searchable_columns(field: &FieldMetadata) -> Vec<String> {
    match field.field_type {
        FieldType::Text => vec![field.name.clone()],
        FieldType::FullName => vec![
            format!("{}FirstName", field.name),
            format!("{}LastName", field.name),
        ],
        _ => vec![],
    }
}

/// The search vector of an object is generated from its label identifier field.
pub fn search_source_columns(object: &ObjectMetadata) -> Vec<String> {
    object
        .label_identifier_field()
        .map(searchable_columns)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wsmeta_catalog::OnDelete;
    use wsmeta_catalog::RelationRef;
    use wsmeta_id::FieldId;
    use wsmeta_id::ObjectId;
    use wsmeta_id::RelationId;
    use wsmeta_id::WorkspaceId;

    fn object_with(fields: Vec<(&str, FieldType)>) -> ObjectMetadata {
        let workspace_id = WorkspaceId::new();
        let id = ObjectId::new();
        let fields: indexmap::IndexMap<_, _> = fields
            .into_iter()
            .map(|(name, field_type)| {
                let field = FieldMetadata {
                    id: FieldId::new(),
                    object_id: id,
                    workspace_id,
                    name: name.to_string(),
                    label: name.to_string(),
                    field_type,
                    is_custom: true,
                    is_system: false,
                    is_nullable: true,
                    is_active: true,
                    relation: None,
                };
                (field.id, field)
            })
            .collect();
        let label_identifier_field_id = fields.values().find(|f| f.name == "name").map(|f| f.id);
        ObjectMetadata {
            id,
            workspace_id,
            name_singular: "task".to_string(),
            name_plural: "tasks".to_string(),
            label_singular: "Task".to_string(),
            label_plural: "Tasks".to_string(),
            description: None,
            icon: None,
            is_custom: true,
            is_remote: false,
            is_system: false,
            is_active: true,
            is_searchable: true,
            is_label_synced_with_name: false,
            label_identifier_field_id,
            image_identifier_field_id: None,
            standard_overrides: None,
            fields,
        }
    }

    #[test]
    fn test_composite_and_enum_columns() {
        let object = object_with(vec![
            ("id", FieldType::Uuid),
            ("name", FieldType::Text),
            ("createdBy", FieldType::Actor),
            ("searchVector", FieldType::TsVector),
        ]);
        let columns = columns_for_object(&object);
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "name",
                "createdBySource",
                "createdByWorkspaceMemberId",
                "createdByName",
                "createdByContext",
                "searchVector"
            ]
        );
        assert_eq!(
            columns[2].column_type.enum_type_name(),
            Some("_task_createdBySource_enum")
        );
        assert_eq!(
            columns[6].column_type,
            ColumnType::TsVector {
                source_columns: vec!["name".to_string()]
            }
        );
        assert!(!columns[0].is_nullable);
    }

    #[test]
    fn test_only_the_many_to_one_side_has_a_column() {
        let mut object = object_with(vec![("assignee", FieldType::Relation)]);
        let field = object.fields.values_mut().next().unwrap();
        field.relation = Some(RelationRef {
            relation_id: RelationId::new(),
            direction: RelationDirection::ManyToOne,
            target_object_id: ObjectId::new(),
            target_field_id: FieldId::new(),
            join_column: Some("assigneeId".to_string()),
            on_delete: OnDelete::SetNull,
        });
        let columns = columns_for_object(&object);
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "assigneeId");

        let field = object.fields.values_mut().next().unwrap();
        if let Some(relation) = field.relation.as_mut() {
            relation.direction = RelationDirection::OneToMany;
        }
        assert!(columns_for_object(&object).is_empty());
    }
}
