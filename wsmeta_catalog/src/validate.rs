//! Validation of object names and labels.
//!
//! Everything here is a pure function of its inputs: no I/O, no locking. Conflict checks take
//! the [`MetadataSnapshot`] the caller is planning against.

use std::sync::LazyLock;

use regex::Regex;
use wsmeta_id::FieldId;
use wsmeta_id::ObjectId;

use crate::model::ObjectMetadata;
use crate::snapshot::MetadataSnapshot;

/// Identifiers become table and column names, so they share the datastore's limit.
pub const IDENTIFIER_MAX_CHAR_LENGTH: usize = 63;

pub const LABEL_MAX_CHAR_LENGTH: usize = 63;

static NAME_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("name format regex is valid"));

const RESERVED_KEYWORDS: &[&str] = &[
    "address",
    "addresses",
    "currencies",
    "currency",
    "event",
    "events",
    "field",
    "fields",
    "fullName",
    "fullNames",
    "link",
    "links",
    "object",
    "objects",
    "relation",
    "relations",
    "type",
    "types",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid identifier \"{value}\": {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("invalid label \"{value}\": {reason}")]
    InvalidLabel { value: String, reason: &'static str },

    #[error("the singular and plural {kind} cannot be the same for an object (\"{value}\")")]
    DuplicateIdentifier { kind: &'static str, value: String },

    #[error("object already exists with name \"{name}\" ({existing_object_id})")]
    ConflictingObject {
        name: String,
        existing_object_id: ObjectId,
    },

    #[error("name \"{name}\" is not synced with label \"{label}\", expected \"{expected}\"")]
    NameLabelOutOfSync {
        name: String,
        label: String,
        expected: String,
    },

    #[error("field {field_id} does not belong to object {object_id}")]
    InvalidIdentifierField {
        field_id: FieldId,
        object_id: ObjectId,
    },

    #[error("object \"{name}\" has no label identifier field")]
    MissingLabelIdentifier { name: String },

    #[error("workspace would exceed its limit of {limit} objects")]
    TooManyObjects { limit: usize },

    #[error("object \"{name}\" would exceed its limit of {limit} fields")]
    TooManyFields { name: String, limit: usize },

    #[error("names of standard object \"{name}\" cannot be changed")]
    ImmutableStandardObject { name: String },
}

pub type Result<T, E = ValidationError> = std::result::Result<T, E>;

pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| ValidationError::InvalidIdentifier {
        value: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.chars().count() > IDENTIFIER_MAX_CHAR_LENGTH {
        return Err(invalid("exceeds 63 characters"));
    }
    if !NAME_FORMAT.is_match(name) {
        return Err(invalid(
            "must be camelCase: a lowercase letter followed by letters and digits",
        ));
    }
    if RESERVED_KEYWORDS.contains(&name) {
        return Err(invalid("is a reserved keyword"));
    }
    Ok(())
}

pub fn validate_label(label: &str) -> Result<()> {
    let invalid = |reason| ValidationError::InvalidLabel {
        value: label.to_string(),
        reason,
    };
    if label.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if label.chars().count() > LABEL_MAX_CHAR_LENGTH {
        return Err(invalid("exceeds 63 characters"));
    }
    Ok(())
}

pub fn validate_object_names(name_singular: &str, name_plural: &str) -> Result<()> {
    validate_name(name_singular)?;
    validate_name(name_plural)
}

pub fn validate_object_labels(label_singular: &str, label_plural: &str) -> Result<()> {
    validate_label(label_singular)?;
    validate_label(label_plural)
}

/// `kind` names what is being compared, "names" or "labels".
pub fn validate_distinct(kind: &'static str, singular: &str, plural: &str) -> Result<()> {
    if normalize(singular) == normalize(plural) {
        return Err(ValidationError::DuplicateIdentifier {
            kind,
            value: singular.to_string(),
        });
    }
    Ok(())
}

pub fn validate_name_and_label_are_synced(name: &str, label: &str) -> Result<()> {
    let expected = name_from_label(label);
    if name != expected {
        return Err(ValidationError::NameLabelOutOfSync {
            name: name.to_string(),
            label: label.to_string(),
            expected,
        });
    }
    Ok(())
}

/// Fails if an active object other than `exclude` already uses either name, in either number.
pub fn validate_no_conflicting_object(
    snapshot: &MetadataSnapshot,
    name_singular: &str,
    name_plural: &str,
    exclude: Option<ObjectId>,
) -> Result<()> {
    for name in [name_singular, name_plural] {
        if let Some(existing) = snapshot
            .objects_named(name)
            .find(|o| o.is_active && Some(o.id) != exclude)
        {
            return Err(ValidationError::ConflictingObject {
                name: name.to_string(),
                existing_object_id: existing.id,
            });
        }
    }
    Ok(())
}

/// Identifier fields must be fields of the object they identify.
pub fn validate_identifier_fields(
    object: &ObjectMetadata,
    label_identifier_field_id: Option<FieldId>,
    image_identifier_field_id: Option<FieldId>,
) -> Result<()> {
    for field_id in [label_identifier_field_id, image_identifier_field_id]
        .into_iter()
        .flatten()
    {
        if !object.fields.contains_key(&field_id) {
            return Err(ValidationError::InvalidIdentifierField {
                field_id,
                object_id: object.id,
            });
        }
    }
    Ok(())
}

pub fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Derive the camelCase name a label maps to: "My Jobs" becomes "myJobs".
pub fn name_from_label(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    let words = label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty());
    for (i, word) in words.enumerate() {
        let lower = word.to_ascii_lowercase();
        if i == 0 {
            name.push_str(&lower);
        } else {
            name.push_str(&capitalize(&lower));
        }
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'n');
    }
    name
}

pub(crate) fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldMetadata;
    use crate::model::FieldType;
    use crate::snapshot::tests::snapshot_with;
    use crate::snapshot::tests::test_object;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use wsmeta_id::WorkspaceId;

    #[test]
    fn test_validate_name() {
        validate_name("task").unwrap();
        validate_name("taskItem2").unwrap();

        for bad in ["", "Task", "task_item", "2tasks", "task item", "fields"] {
            assert!(
                matches!(
                    validate_name(bad),
                    Err(ValidationError::InvalidIdentifier { .. })
                ),
                "{bad} should be rejected"
            );
        }
        assert!(validate_name(&"a".repeat(64)).is_err());
        validate_name(&"a".repeat(63)).unwrap();
    }

    #[test]
    fn test_validate_label() {
        validate_label("Task").unwrap();
        assert!(validate_label("   ").is_err());
        assert!(validate_label(&"L".repeat(64)).is_err());
    }

    #[test]
    fn test_distinct_ignores_case_and_whitespace() {
        validate_distinct("names", "task", "tasks").unwrap();
        let err = validate_distinct("labels", "Task", " task ").unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateIdentifier {
                kind: "labels",
                value: "Task".to_string()
            }
        );
    }

    #[test]
    fn test_name_from_label() {
        assert_eq!(name_from_label("Task"), "task");
        assert_eq!(name_from_label("My Jobs"), "myJobs");
        assert_eq!(name_from_label("  SALES-order item "), "salesOrderItem");
        assert_eq!(name_from_label("3D Model"), "n3dModel");
    }

    #[test]
    fn test_synced_names() {
        validate_name_and_label_are_synced("myJobs", "My Jobs").unwrap();
        let err = validate_name_and_label_are_synced("jobs", "My Jobs").unwrap_err();
        assert!(matches!(err, ValidationError::NameLabelOutOfSync { expected, .. } if expected == "myJobs"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("task"), "Task");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("élan"), "Élan");
    }

    #[test]
    fn test_conflicts_cross_compare_singular_and_plural() {
        let workspace_id = WorkspaceId::new();
        let task = test_object(workspace_id, "task", "tasks");
        let snapshot = snapshot_with(workspace_id, vec![task.clone()]);

        let err = validate_no_conflicting_object(&snapshot, "tasks", "taskList", None).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ConflictingObject {
                name: "tasks".to_string(),
                existing_object_id: task.id
            }
        );
        // the object itself does not conflict with its own names
        validate_no_conflicting_object(&snapshot, "task", "tasks", Some(task.id)).unwrap();
    }

    #[test]
    fn test_inactive_objects_do_not_conflict() {
        let workspace_id = WorkspaceId::new();
        let mut task = test_object(workspace_id, "task", "tasks");
        task.is_active = false;
        let snapshot = snapshot_with(workspace_id, vec![task]);
        validate_no_conflicting_object(&snapshot, "task", "tasks", None).unwrap();
    }

    #[test]
    fn test_identifier_fields_must_belong_to_object() {
        let workspace_id = WorkspaceId::new();
        let task = test_object(workspace_id, "task", "tasks");
        let own = *task.fields.keys().next().unwrap();
        validate_identifier_fields(&task, Some(own), None).unwrap();

        let stranger = FieldMetadata {
            id: FieldId::new(),
            object_id: ObjectId::new(),
            workspace_id,
            name: "name".to_string(),
            label: "Name".to_string(),
            field_type: FieldType::Text,
            is_custom: false,
            is_system: false,
            is_nullable: true,
            is_active: true,
            relation: None,
        };
        let err = validate_identifier_fields(&task, Some(own), Some(stranger.id)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidIdentifierField { field_id, .. } if field_id == stranger.id));
    }

    fn case_variant(name: String, flips: Vec<bool>, pad: usize) -> String {
        let varied: String = name
            .chars()
            .zip(flips.into_iter().chain(std::iter::repeat(false)))
            .map(|(c, flip)| if flip { c.to_ascii_uppercase() } else { c })
            .collect();
        format!("{}{varied}{}", " ".repeat(pad), " ".repeat(pad))
    }

    proptest! {
        #[test]
        fn prop_any_case_or_whitespace_variant_conflicts(
            name in "[a-z][a-z0-9]{0,20}",
            flips in proptest::collection::vec(any::<bool>(), 0..22),
            pad in 0usize..3,
        ) {
            let workspace_id = WorkspaceId::new();
            let existing = test_object(workspace_id, &name, &format!("{name}Plural"));
            let snapshot = snapshot_with(workspace_id, vec![existing]);
            let variant = case_variant(name, flips, pad);
            let result = validate_no_conflicting_object(&snapshot, &variant, "somethingElse", None);
            let is_conflict = matches!(result, Err(ValidationError::ConflictingObject { .. }));
            prop_assert!(is_conflict);
        }
    }
}
