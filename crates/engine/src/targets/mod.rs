//! Targets: the one resource type that carries subtype attributes.

pub mod tcp;

use portcullis_core::{CoreError, CreateOption, FieldSpec, FieldValue, Schema, ValueKind};
use portcullis_storage::ResourceRecord;

pub const HOST_SET_IDS: &str = "host_set_ids";

/// Paths common to every target subtype.
pub const TARGET_FIELDS: &[FieldSpec] = &[
    FieldSpec::identity("id"),
    FieldSpec::identity("scope_id"),
    FieldSpec::mutable("name", "name", ValueKind::Text),
    FieldSpec::mutable("description", "description", ValueKind::Text),
    FieldSpec::output("type", ValueKind::Text),
    FieldSpec::output("version", ValueKind::Integer),
    FieldSpec::output("created_time", ValueKind::Timestamp),
    FieldSpec::output("updated_time", ValueKind::Timestamp),
    FieldSpec::membership(HOST_SET_IDS),
];

pub fn base_schema() -> Result<Schema, CoreError> {
    Schema::new(TARGET_FIELDS)
}

/// Write one subtype-derived initial value onto a record being created.
/// Explicit values in the request win over derived names and descriptions.
pub(crate) fn apply_create_option(record: &mut ResourceRecord, option: CreateOption) {
    match option {
        CreateOption::Name(name) => {
            record.fields.entry("name".into()).or_insert(FieldValue::Text(name));
        }
        CreateOption::Description(description) => {
            record
                .fields
                .entry("description".into())
                .or_insert(FieldValue::Text(description));
        }
        CreateOption::DefaultPort(port) => {
            record.fields.insert(
                tcp::DEFAULT_PORT_COLUMN.into(),
                FieldValue::Integer(i64::from(port)),
            );
        }
    }
}
