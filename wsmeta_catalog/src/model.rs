//! Rows of the metadata catalog.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use wsmeta_id::FieldId;
use wsmeta_id::IndexId;
use wsmeta_id::ObjectId;
use wsmeta_id::RelationId;
use wsmeta_id::WorkspaceId;

/// Name of the field that backs the primary key of every object table.
pub const ID_FIELD_NAME: &str = "id";

/// Name of the full-text search field on searchable objects.
pub const SEARCH_VECTOR_FIELD_NAME: &str = "searchVector";

/// Values of the enum column behind the `source` part of an [`FieldType::Actor`] field.
pub const ACTOR_SOURCES: &[&str] = &[
    "EMAIL", "CALENDAR", "WORKFLOW", "API", "IMPORT", "MANUAL", "SYSTEM", "WEBHOOK",
];

/// Values of the enum column behind a [`FieldType::Rating`] field.
pub const RATING_VALUES: &[&str] = &["RATING_1", "RATING_2", "RATING_3", "RATING_4", "RATING_5"];

/// Length of the hash part of generated index and constraint names.
const GENERATED_NAME_HASH_LEN: usize = 27;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub id: ObjectId,
    pub workspace_id: WorkspaceId,
    pub name_singular: String,
    pub name_plural: String,
    pub label_singular: String,
    pub label_plural: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub is_custom: bool,
    pub is_remote: bool,
    pub is_system: bool,
    pub is_active: bool,
    pub is_searchable: bool,
    pub is_label_synced_with_name: bool,
    pub label_identifier_field_id: Option<FieldId>,
    pub image_identifier_field_id: Option<FieldId>,
    pub standard_overrides: Option<StandardOverrides>,
    #[serde(default)]
    pub fields: IndexMap<FieldId, FieldMetadata>,
}

impl ObjectMetadata {
    /// Name of the physical table holding this object's records.
    pub fn target_table_name(&self) -> String {
        compute_target_table_name(&self.name_singular, self.is_custom)
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldMetadata> {
        self.fields.get(&id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.values().find(|f| f.name == name)
    }

    pub fn label_identifier_field(&self) -> Option<&FieldMetadata> {
        self.label_identifier_field_id.and_then(|id| self.field(id))
    }

    /// Relation fields of this object, ordered by relation id.
    pub fn relation_fields(&self) -> Vec<&FieldMetadata> {
        let mut fields: Vec<&FieldMetadata> =
            self.fields.values().filter(|f| f.relation.is_some()).collect();
        fields.sort_by_key(|f| f.relation.as_ref().map(|r| r.relation_id));
        fields
    }

    /// A copy of this row without its fields, as it is stored in the objects table.
    pub fn without_fields(&self) -> Self {
        Self {
            fields: IndexMap::new(),
            ..self.clone()
        }
    }
}

/// Per-locale overrides for the labels of a standard object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardOverrides {
    pub label_singular: Option<String>,
    pub label_plural: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    #[serde(default)]
    pub translations: BTreeMap<String, LabelOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelOverrides {
    pub label_singular: Option<String>,
    pub label_plural: Option<String>,
    pub description: Option<String>,
}

/// A translatable string on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelKey {
    LabelSingular,
    LabelPlural,
    Description,
}

impl LabelKey {
    pub fn raw<'a>(&self, object: &'a ObjectMetadata) -> Option<&'a str> {
        match self {
            Self::LabelSingular => Some(&object.label_singular),
            Self::LabelPlural => Some(&object.label_plural),
            Self::Description => object.description.as_deref(),
        }
    }

    pub fn overridden<'a>(&self, overrides: &'a LabelOverrides) -> Option<&'a str> {
        match self {
            Self::LabelSingular => overrides.label_singular.as_deref(),
            Self::LabelPlural => overrides.label_plural.as_deref(),
            Self::Description => overrides.description.as_deref(),
        }
    }

    pub fn overridden_default<'a>(&self, overrides: &'a StandardOverrides) -> Option<&'a str> {
        match self {
            Self::LabelSingular => overrides.label_singular.as_deref(),
            Self::LabelPlural => overrides.label_plural.as_deref(),
            Self::Description => overrides.description.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: FieldId,
    pub object_id: ObjectId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub is_custom: bool,
    pub is_system: bool,
    pub is_nullable: bool,
    pub is_active: bool,
    pub relation: Option<RelationRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Uuid,
    Text,
    Number,
    Boolean,
    DateTime,
    Position,
    RawJson,
    TsVector,
    Select { options: Vec<String> },
    MultiSelect { options: Vec<String> },
    Rating,
    Actor,
    FullName,
    Relation,
}

impl FieldType {
    /// Whether values of this type can feed an object's search vector.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Self::Text | Self::FullName)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationDirection {
    OneToMany,
    ManyToOne,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDelete {
    Cascade,
    #[default]
    SetNull,
    Restrict,
}

/// The relation side of a relation field.
///
/// The [`RelationDirection::ManyToOne`] side owns the join column and the foreign key that
/// points at the other side's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRef {
    pub relation_id: RelationId,
    pub direction: RelationDirection,
    pub target_object_id: ObjectId,
    pub target_field_id: FieldId,
    pub join_column: Option<String>,
    pub on_delete: OnDelete,
}

/// A bidirectional link between two objects. The source is the one-to-many side, the target
/// holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMetadata {
    pub id: RelationId,
    pub workspace_id: WorkspaceId,
    pub source_object_id: ObjectId,
    pub source_field_id: FieldId,
    pub target_object_id: ObjectId,
    pub target_field_id: FieldId,
    pub on_delete: OnDelete,
}

impl RelationMetadata {
    pub fn touches(&self, object_id: ObjectId) -> bool {
        self.source_object_id == object_id || self.target_object_id == object_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    Btree,
    Gin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub id: IndexId,
    pub workspace_id: WorkspaceId,
    pub object_id: ObjectId,
    pub name: String,
    pub columns: Vec<String>,
    pub index_type: IndexType,
    pub is_unique: bool,
}

impl IndexMetadata {
    pub fn new(
        object: &ObjectMetadata,
        columns: Vec<String>,
        index_type: IndexType,
        is_unique: bool,
    ) -> Self {
        Self {
            id: IndexId::new(),
            workspace_id: object.workspace_id,
            object_id: object.id,
            name: compute_index_name(&object.target_table_name(), &columns),
            columns,
            index_type,
            is_unique,
        }
    }

    /// This index with its name derived from `table`.
    pub fn renamed_for(&self, table: &str) -> Self {
        Self {
            name: compute_index_name(table, &self.columns),
            ..self.clone()
        }
    }
}

/// Custom objects live in `_`-prefixed tables so they cannot shadow a standard object's table.
pub fn compute_target_table_name(name_singular: &str, is_custom: bool) -> String {
    if is_custom {
        format!("_{name_singular}")
    } else {
        name_singular.to_string()
    }
}

/// Join column of a many-to-one relation field.
pub fn compute_join_column_name(field_name: &str) -> String {
    format!("{field_name}Id")
}

/// Name of the enum type backing `column` of `table`.
pub fn compute_enum_type_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_enum")
}

pub fn compute_index_name(table: &str, columns: &[String]) -> String {
    format!("IDX_{}", generated_name_hash(table, columns))
}

pub fn compute_foreign_key_name(table: &str, column: &str) -> String {
    format!("FK_{}", generated_name_hash(table, &[column.to_string()]))
}

fn generated_name_hash(table: &str, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    for column in columns {
        hasher.update(b"_");
        hasher.update(column.as_bytes());
    }
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(GENERATED_NAME_HASH_LEN);
    hash
}
