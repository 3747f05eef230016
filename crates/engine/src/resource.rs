use std::collections::{BTreeMap, BTreeSet};

use portcullis_core::{AttributeMap, FieldValue, PublicId, Schema, ScopeId};
use portcullis_storage::{ResourceRecord, ResourceType};

use crate::registry::SubtypeEntry;

/// Caller-facing view of a stored resource. Sealed values never appear here.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: PublicId,
    pub scope_id: ScopeId,
    pub resource_type: ResourceType,
    pub subtype: Option<String>,
    pub version: u32,
    pub created_time: i64,
    pub updated_time: i64,
    /// Plain fields keyed by path.
    pub fields: BTreeMap<&'static str, FieldValue>,
    /// Subtype attributes keyed without the `attributes.` prefix.
    pub attributes: AttributeMap,
    pub members: BTreeSet<PublicId>,
}

impl Resource {
    pub(crate) fn project(
        record: ResourceRecord,
        schema: &Schema,
        entry: Option<&SubtypeEntry>,
    ) -> Self {
        let attributes = entry.map(|e| e.project(&record)).unwrap_or_default();
        let fields = record
            .fields
            .iter()
            .filter_map(|(column, value)| {
                let spec = schema.by_column(column)?;
                (!spec.is_attribute()).then(|| (spec.path, value.clone()))
            })
            .collect();

        Self {
            id: record.id,
            scope_id: record.scope_id,
            resource_type: record.resource_type,
            subtype: record.subtype,
            version: record.version,
            created_time: record.created_time,
            updated_time: record.updated_time,
            fields,
            attributes,
            members: record.members,
        }
    }

    pub fn field(&self, path: &str) -> Option<&FieldValue> {
        self.fields.get(path)
    }

    pub fn name(&self) -> Option<&str> {
        self.field("name").and_then(FieldValue::as_text)
    }

    pub fn description(&self) -> Option<&str> {
        self.field("description").and_then(FieldValue::as_text)
    }

    pub fn attribute(&self, key: &str) -> Option<&FieldValue> {
        self.attributes.get(key)
    }
}
