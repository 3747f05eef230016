use std::collections::BTreeMap;

use crate::attributes::{AttributeBuilder, AttributeMap};
use crate::field_value::{FieldValue, ValueKind};
use crate::schema::{FieldPath, FieldSpec, Mutability, Schema};

/// Validation failures keyed by field path.
pub type FieldErrors = BTreeMap<String, String>;

pub const MSG_UNKNOWN: &str = "Unknown field.";
pub const MSG_IMMUTABLE: &str = "This field is immutable.";
pub const MSG_READ_ONLY: &str = "This is a read only field.";
pub const MSG_MEMBERSHIP: &str = "This field can only be changed through membership operations.";
pub const MSG_NOT_CLEARABLE: &str = "This field cannot be cleared.";
pub const MSG_SET_AND_CLEAR: &str = "This field is both set and cleared.";
pub const MSG_DUPLICATE: &str = "This field is listed more than once.";
pub const MSG_CLEAR_ON_CREATE: &str = "Fields cannot be cleared on create.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Set(FieldValue),
    Clear,
}

/// A caller's proposed changes, in the raw form they arrive in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDelta {
    entries: Vec<(String, Change)>,
}

impl FieldDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, value: impl Into<FieldValue>) -> Self {
        self.entries.push((path.to_string(), Change::Set(value.into())));
        self
    }

    pub fn clear(mut self, path: &str) -> Self {
        self.entries.push((path.to_string(), Change::Clear));
        self
    }

    pub fn push(&mut self, path: impl Into<String>, change: Change) {
        self.entries.push((path.into(), change));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }
}

/// Validated partition of a delta into paths to write and paths to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    set: BTreeMap<FieldPath, FieldValue>,
    null: Vec<FieldPath>,
}

impl FieldMask {
    pub fn set_paths(&self) -> impl Iterator<Item = FieldPath> + '_ {
        self.set.keys().copied()
    }

    pub fn null_paths(&self) -> impl Iterator<Item = FieldPath> + '_ {
        self.null.iter().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = (FieldPath, &FieldValue)> {
        self.set.iter().map(|(p, v)| (*p, v))
    }

    /// Every path named by the mask, set or cleared.
    pub fn paths(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self.set.keys().map(|p| p.as_str()).collect();
        out.extend(self.null.iter().map(|p| p.as_str()));
        out
    }

    pub fn contains(&self, path: &str) -> bool {
        self.set.keys().any(|p| p.as_str() == path) || self.null.iter().any(|p| p.as_str() == path)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.null.is_empty()
    }

    /// Attribute values named by the mask; cleared attributes are absent.
    pub fn attribute_values(&self) -> AttributeMap {
        self.set
            .iter()
            .filter_map(|(p, v)| p.attribute_key().map(|k| (k.to_string(), v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    /// The delta named no fields at all.
    Empty,
    Fields(FieldErrors),
}

/// Which request the delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOp {
    Create,
    Update,
}

/// Partition `delta` against `schema`, enforcing mutability rules and, when
/// `attributes` is given, the subtype's own checks for the paths in the mask.
///
/// Every violation is reported; the mask is only returned when there are none.
pub fn compute_mask(
    schema: &Schema,
    delta: &FieldDelta,
    op: MaskOp,
    attributes: Option<AttributeBuilder>,
) -> Result<FieldMask, MaskError> {
    if delta.is_empty() && op == MaskOp::Update {
        return Err(MaskError::Empty);
    }

    let mut errors = FieldErrors::new();
    let mut set: BTreeMap<FieldPath, FieldValue> = BTreeMap::new();
    let mut null: Vec<FieldPath> = Vec::new();

    for (raw, change) in delta.iter() {
        let Some((path, spec)) = schema.resolve(raw) else {
            errors.insert(raw.to_string(), MSG_UNKNOWN.to_string());
            continue;
        };
        if let Some(msg) = mutability_error(spec, op) {
            errors.insert(raw.to_string(), msg.to_string());
            continue;
        }
        match change {
            Change::Set(value) => {
                if value.kind() != spec.kind {
                    errors.insert(raw.to_string(), wrong_kind_message(spec.kind));
                    continue;
                }
                if null.contains(&path) {
                    errors.insert(raw.to_string(), MSG_SET_AND_CLEAR.to_string());
                } else if set.insert(path, value.clone()).is_some() {
                    errors.insert(raw.to_string(), MSG_DUPLICATE.to_string());
                }
            }
            Change::Clear => {
                if op == MaskOp::Create {
                    errors.insert(raw.to_string(), MSG_CLEAR_ON_CREATE.to_string());
                } else if !spec.clearable && !(spec.is_attribute() && attributes.is_some()) {
                    // a subtype reports its own clear rules for attributes
                    errors.insert(raw.to_string(), MSG_NOT_CLEARABLE.to_string());
                } else if set.contains_key(&path) {
                    errors.insert(raw.to_string(), MSG_SET_AND_CLEAR.to_string());
                } else if null.contains(&path) {
                    errors.insert(raw.to_string(), MSG_DUPLICATE.to_string());
                } else {
                    null.push(path);
                }
            }
        }
    }

    let mask = FieldMask { set, null };

    if let Some(build) = attributes {
        let attrs = build(&mask.attribute_values());
        let subtype_errors = match op {
            MaskOp::Create => attrs.validate(),
            MaskOp::Update => attrs.validate_for_update(&mask.paths()),
        };
        for (path, msg) in subtype_errors {
            errors.entry(path).or_insert(msg);
        }
    }

    if errors.is_empty() {
        Ok(mask)
    } else {
        Err(MaskError::Fields(errors))
    }
}

fn wrong_kind_message(kind: ValueKind) -> String {
    let article = match kind {
        ValueKind::Integer => "an",
        _ => "a",
    };
    format!("Expected {article} {kind} value.")
}

fn mutability_error(spec: &FieldSpec, op: MaskOp) -> Option<&'static str> {
    match (spec.mutability, op) {
        (Mutability::Mutable, _) => None,
        (Mutability::Immutable, MaskOp::Create) => None,
        (Mutability::Immutable, MaskOp::Update) => Some(MSG_IMMUTABLE),
        (Mutability::Identity, MaskOp::Update) => Some(MSG_IMMUTABLE),
        (Mutability::Identity, MaskOp::Create) => Some(MSG_READ_ONLY),
        (Mutability::Output, _) => Some(MSG_READ_ONLY),
        (Mutability::Membership, _) => Some(MSG_MEMBERSHIP),
    }
}
