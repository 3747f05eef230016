use std::collections::BTreeSet;
use std::fmt;

use crate::error::CoreError;
use crate::field_value::ValueKind;

pub const ATTRIBUTES_PREFIX: &str = "attributes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Writable on create and on update.
    Mutable,
    /// Supplied at creation, never changed afterwards.
    Immutable,
    /// Identity of the resource (`id`, `scope_id`); never part of a field list.
    Identity,
    /// Maintained by the system (`version`, timestamps, `type`).
    Output,
    /// Changed only by add/set/remove membership operations.
    Membership,
}

/// One field of a resource schema: the caller-facing path and the storage
/// column it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: &'static str,
    pub column: &'static str,
    pub kind: ValueKind,
    pub mutability: Mutability,
    pub clearable: bool,
}

impl FieldSpec {
    pub const fn mutable(path: &'static str, column: &'static str, kind: ValueKind) -> Self {
        Self {
            path,
            column,
            kind,
            mutability: Mutability::Mutable,
            clearable: true,
        }
    }

    /// Mutable, but may not be cleared once set.
    pub const fn required(path: &'static str, column: &'static str, kind: ValueKind) -> Self {
        Self {
            path,
            column,
            kind,
            mutability: Mutability::Mutable,
            clearable: false,
        }
    }

    pub const fn immutable(path: &'static str, column: &'static str, kind: ValueKind) -> Self {
        Self {
            path,
            column,
            kind,
            mutability: Mutability::Immutable,
            clearable: false,
        }
    }

    pub const fn identity(path: &'static str) -> Self {
        Self {
            path,
            column: path,
            kind: ValueKind::Text,
            mutability: Mutability::Identity,
            clearable: false,
        }
    }

    pub const fn output(path: &'static str, kind: ValueKind) -> Self {
        Self {
            path,
            column: path,
            kind,
            mutability: Mutability::Output,
            clearable: false,
        }
    }

    pub const fn membership(path: &'static str) -> Self {
        Self {
            path,
            column: path,
            kind: ValueKind::Text,
            mutability: Mutability::Membership,
            clearable: false,
        }
    }

    pub fn is_attribute(&self) -> bool {
        self.path.starts_with(ATTRIBUTES_PREFIX)
    }

    /// The attribute key without the `attributes.` prefix.
    pub fn attribute_key(&self) -> Option<&'static str> {
        self.path.strip_prefix(ATTRIBUTES_PREFIX)
    }
}

/// A path that has been resolved against a [`Schema`]. Only obtainable
/// through [`Schema::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    path: &'static str,
    column: &'static str,
}

impl FieldPath {
    pub fn as_str(&self) -> &'static str {
        self.path
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn attribute_key(&self) -> Option<&'static str> {
        self.path.strip_prefix(ATTRIBUTES_PREFIX)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path)
    }
}

/// Subtype-specific attribute fields, all living under `attributes.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRules {
    fields: Vec<FieldSpec>,
}

impl MaskRules {
    pub fn new(fields: &[FieldSpec]) -> Result<Self, CoreError> {
        let mut seen = BTreeSet::new();
        for spec in fields {
            if !spec.is_attribute() {
                return Err(CoreError::InvalidSchema(format!(
                    "attribute path {} must start with {ATTRIBUTES_PREFIX}",
                    spec.path
                )));
            }
            if matches!(spec.mutability, Mutability::Identity | Mutability::Membership) {
                return Err(CoreError::InvalidSchema(format!(
                    "attribute {} cannot be an identity or membership field",
                    spec.path
                )));
            }
            if !seen.insert(spec.path) {
                return Err(CoreError::InvalidSchema(format!("duplicate path {}", spec.path)));
            }
        }
        Ok(Self {
            fields: fields.to_vec(),
        })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

/// The full set of paths a resource type understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: &[FieldSpec]) -> Result<Self, CoreError> {
        let schema = Self {
            fields: Vec::with_capacity(fields.len()),
        };
        schema.extend(fields)
    }

    /// Layer subtype attribute rules on top of a base schema.
    pub fn with_rules(&self, rules: &MaskRules) -> Result<Self, CoreError> {
        self.clone().extend(rules.fields())
    }

    fn extend(mut self, fields: &[FieldSpec]) -> Result<Self, CoreError> {
        for spec in fields {
            if self.fields.iter().any(|f| f.path == spec.path) {
                return Err(CoreError::InvalidSchema(format!("duplicate path {}", spec.path)));
            }
            if self.fields.iter().any(|f| f.column == spec.column) {
                return Err(CoreError::InvalidSchema(format!(
                    "column {} mapped twice",
                    spec.column
                )));
            }
            self.fields.push(*spec);
        }
        Ok(self)
    }

    pub fn resolve(&self, path: &str) -> Option<(FieldPath, &FieldSpec)> {
        self.fields.iter().find(|f| f.path == path).map(|spec| {
            let path = FieldPath {
                path: spec.path,
                column: spec.column,
            };
            (path, spec)
        })
    }

    /// Reverse lookup from a storage column.
    pub fn by_column(&self, column: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.column == column)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}
