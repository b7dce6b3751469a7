use indexmap::IndexMap;
use wsmeta_catalog::CatalogRevision;
use wsmeta_catalog::FieldMetadata;
use wsmeta_catalog::FieldType;
use wsmeta_catalog::IndexMetadata;
use wsmeta_catalog::MetadataSnapshot;
use wsmeta_catalog::MetadataVersion;
use wsmeta_catalog::ObjectMetadata;
use wsmeta_catalog::RelationMetadata;
use wsmeta_catalog::WorkspaceRows;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;
use wsmeta_id::WorkspaceId;

fn object(
    workspace_id: WorkspaceId,
    name_singular: &str,
    name_plural: &str,
    is_custom: bool,
    fields: &[(&str, FieldType)],
) -> ObjectMetadata {
    let id = ObjectId::new();
    let fields: IndexMap<_, _> = fields
        .iter()
        .map(|(name, field_type)| {
            let field = FieldMetadata {
                id: FieldId::new(),
                object_id: id,
                workspace_id,
                name: name.to_string(),
                label: wsmeta_catalog::validate::capitalize(name),
                field_type: field_type.clone(),
                is_custom: false,
                is_system: *name == "id",
                is_nullable: *name != "id",
                is_active: true,
                relation: None,
            };
            (field.id, field)
        })
        .collect();
    let label_identifier_field_id = fields
        .values()
        .find(|f| f.name == "name")
        .or_else(|| fields.values().find(|f| f.name == "id"))
        .map(|f| f.id);
    ObjectMetadata {
        id,
        workspace_id,
        name_singular: name_singular.to_string(),
        name_plural: name_plural.to_string(),
        label_singular: wsmeta_catalog::validate::capitalize(name_singular),
        label_plural: wsmeta_catalog::validate::capitalize(name_plural),
        description: None,
        icon: None,
        is_custom,
        is_remote: false,
        is_system: !is_custom,
        is_active: true,
        is_searchable: is_custom,
        is_label_synced_with_name: false,
        label_identifier_field_id,
        image_identifier_field_id: None,
        standard_overrides: None,
        fields,
    }
}

/// A searchable custom object with a name, an actor and a search vector.
pub(crate) fn custom_object(
    workspace_id: WorkspaceId,
    name_singular: &str,
    name_plural: &str,
) -> ObjectMetadata {
    object(
        workspace_id,
        name_singular,
        name_plural,
        true,
        &[
            ("id", FieldType::Uuid),
            ("name", FieldType::Text),
            ("createdBy", FieldType::Actor),
            ("searchVector", FieldType::TsVector),
        ],
    )
}

pub(crate) fn standard_object(
    workspace_id: WorkspaceId,
    name_singular: &str,
    name_plural: &str,
) -> ObjectMetadata {
    object(
        workspace_id,
        name_singular,
        name_plural,
        false,
        &[("id", FieldType::Uuid)],
    )
}

pub(crate) fn snapshot(
    workspace_id: WorkspaceId,
    objects: Vec<ObjectMetadata>,
    relations: Vec<RelationMetadata>,
    indexes: Vec<IndexMetadata>,
) -> MetadataSnapshot {
    MetadataSnapshot::new(
        workspace_id,
        MetadataVersion::new(1),
        WorkspaceRows {
            revision: CatalogRevision::new(1),
            objects,
            relations,
            indexes,
        },
    )
}

/// Replace or insert `field` on `object`.
pub(crate) fn put_field(object: &mut ObjectMetadata, field: FieldMetadata) {
    object.fields.insert(field.id, field);
}
