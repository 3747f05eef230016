use portcullis_core::{CoreError, FieldSpec, Schema, ValueKind};

pub const ID_PREFIX: &str = "hsst";

pub const HOST_SET_FIELDS: &[FieldSpec] = &[
    FieldSpec::identity("id"),
    FieldSpec::identity("scope_id"),
    FieldSpec::mutable("name", "name", ValueKind::Text),
    FieldSpec::mutable("description", "description", ValueKind::Text),
    FieldSpec::output("version", ValueKind::Integer),
    FieldSpec::output("created_time", ValueKind::Timestamp),
    FieldSpec::output("updated_time", ValueKind::Timestamp),
];

pub fn schema() -> Result<Schema, CoreError> {
    Schema::new(HOST_SET_FIELDS)
}
