//! Fields every custom object starts with.

use indexmap::IndexMap;
use wsmeta_catalog::FieldMetadata;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::ID_FIELD_NAME;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::SEARCH_VECTOR_FIELD_NAME;
use wsmeta_id::FieldId;

/// The default label identifier of a custom object.
pub const NAME_FIELD_NAME: &str = "name";

struct DefaultField {
    name: &'static str,
    label: &'static str,
    field_type: FieldType,
    is_system: bool,
    is_nullable: bool,
}

fn default_field_specs() -> [DefaultField; 8] {
    let field = |name, label, field_type, is_system, is_nullable| DefaultField {
        name,
        label,
        field_type,
        is_system,
        is_nullable,
    };
    [
        field(ID_FIELD_NAME, "Id", FieldType::Uuid, true, false),
        field(NAME_FIELD_NAME, "Name", FieldType::Text, false, true),
        field("createdAt", "Creation date", FieldType::DateTime, false, false),
        field("updatedAt", "Last update", FieldType::DateTime, false, false),
        field("deletedAt", "Deleted", FieldType::DateTime, false, true),
        field("createdBy", "Created by", FieldType::Actor, false, false),
        field("position", "Position", FieldType::Position, true, true),
        field(SEARCH_VECTOR_FIELD_NAME, "Search vector", FieldType::TsVector, true, true),
    ]
}

/// The default fields of `object`, in column order. The search vector comes last since it is
/// generated from the name.
pub fn default_fields(object: &ObjectMetadata) -> IndexMap<FieldId, FieldMetadata> {
    default_field_specs()
        .into_iter()
        .map(|spec| {
            let field = FieldMetadata {
                id: FieldId::new(),
                object_id: object.id,
                workspace_id: object.workspace_id,
                name: spec.name.to_string(),
                label: spec.label.to_string(),
                field_type: spec.field_type,
                is_custom: false,
                is_system: spec.is_system,
                is_nullable: spec.is_nullable,
                is_active: true,
                relation: None,
            };
            (field.id, field)
        })
        .collect()
}
