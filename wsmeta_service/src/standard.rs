//! The standard objects custom objects get related to.

use indexmap::IndexMap;
use wsmeta_catalog::FieldMetadata;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::ID_FIELD_NAME;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::validate::capitalize;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;

const KNOWN_PLURALS: &[(&str, &str)] = &[
    ("favorite", "favorites"),
    ("attachment", "attachments"),
    ("timelineActivity", "timelineActivities"),
    ("noteTarget", "noteTargets"),
    ("taskTarget", "taskTargets"),
];

fn plural_of(name_singular: &str) -> String {
    KNOWN_PLURALS
        .iter()
        .find(|(singular, _)| *singular == name_singular)
        .map(|(_, plural)| plural.to_string())
        .unwrap_or_else(|| format!("{name_singular}s"))
}

/// "timelineActivity" becomes "Timeline activity".
fn label_for(name: &str) -> String {
    let mut label = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            label.push(' ');
            label.push(c.to_ascii_lowercase());
        } else {
            label.push(c);
        }
    }
    capitalize(&label)
}

/// A standard object with the bookkeeping fields all records share.
pub fn standard_object(workspace_id: WorkspaceId, name_singular: &str) -> ObjectMetadata {
    let id = ObjectId::new();
    let name_plural = plural_of(name_singular);
    let field = |name: &str, label: &str, field_type, is_nullable| {
        let field = FieldMetadata {
            id: FieldId::new(),
            object_id: id,
            workspace_id,
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            is_custom: false,
            is_system: true,
            is_nullable,
            is_active: true,
            relation: None,
        };
        (field.id, field)
    };
    let fields: IndexMap<_, _> = [
        field(ID_FIELD_NAME, "Id", FieldType::Uuid, false),
        field("createdAt", "Creation date", FieldType::DateTime, false),
        field("updatedAt", "Last update", FieldType::DateTime, false),
        field("deletedAt", "Deleted", FieldType::DateTime, true),
    ]
    .into_iter()
    .collect();
    let label_identifier_field_id = fields.keys().next().copied();

    ObjectMetadata {
        id,
        workspace_id,
        label_singular: label_for(name_singular),
        label_plural: label_for(&name_plural),
        name_singular: name_singular.to_string(),
        name_plural,
        description: None,
        icon: None,
        is_custom: false,
        is_remote: false,
        is_system: true,
        is_active: true,
        is_searchable: false,
        is_label_synced_with_name: false,
        label_identifier_field_id,
        image_identifier_field_id: None,
        standard_overrides: None,
        fields,
    }
}
