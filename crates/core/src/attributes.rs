use std::collections::BTreeMap;
use std::fmt;

use crate::field_value::FieldValue;
use crate::mask::FieldErrors;

/// Subtype attribute values keyed without the `attributes.` prefix.
pub type AttributeMap = BTreeMap<String, FieldValue>;

/// Initial column values a subtype derives from its attributes at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOption {
    Name(String),
    Description(String),
    DefaultPort(u32),
}

/// Behaviour every resource subtype's attribute payload provides.
pub trait Attributes: fmt::Debug + Send + Sync {
    /// Checks for a create request; every rule applies.
    fn validate(&self) -> FieldErrors;

    /// Checks for an update; rules fire only for paths named in `mask`.
    fn validate_for_update(&self, mask: &[&str]) -> FieldErrors;

    fn creation_options(&self) -> Vec<CreateOption>;
}

pub type AttributeBuilder = fn(&AttributeMap) -> Box<dyn Attributes>;

pub fn mask_contains(mask: &[&str], path: &str) -> bool {
    mask.iter().any(|p| p.eq_ignore_ascii_case(path))
}
