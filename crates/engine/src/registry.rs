//! Attribute plug-in registry.
//!
//! Target subtypes contribute their attribute schema, a builder that turns
//! raw attribute values into an [`Attributes`] implementation, and a
//! projector that reads their stored columns back out. The core never
//! needs to know which subtypes exist.

use std::collections::BTreeMap;

use portcullis_core::attributes::AttributeBuilder;
use portcullis_core::{AttributeMap, MaskRules, Schema};
use portcullis_storage::ResourceRecord;

use crate::error::EngineError;
use crate::{authtoken, host_sets, targets};

/// Id prefixes owned by resource types outside the registry.
const RESERVED_PREFIXES: [&str; 2] = [host_sets::ID_PREFIX, authtoken::ID_PREFIX];

/// Reads a subtype's attribute values out of a stored record.
pub type AttributeProjector = fn(&ResourceRecord) -> AttributeMap;

#[derive(Debug)]
pub struct SubtypeEntry {
    subtype: &'static str,
    id_prefix: &'static str,
    mask_rules: MaskRules,
    schema: Schema,
    build: AttributeBuilder,
    project: AttributeProjector,
}

impl SubtypeEntry {
    pub fn subtype(&self) -> &'static str {
        self.subtype
    }

    pub fn id_prefix(&self) -> &'static str {
        self.id_prefix
    }

    pub fn mask_rules(&self) -> &MaskRules {
        &self.mask_rules
    }

    /// The target base schema with this subtype's attribute rules layered on.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn builder(&self) -> AttributeBuilder {
        self.build
    }

    pub fn project(&self, record: &ResourceRecord) -> AttributeMap {
        (self.project)(record)
    }
}

#[derive(Debug, Default)]
pub struct AttributeRegistry {
    entries: BTreeMap<&'static str, SubtypeEntry>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every subtype shipped in this crate.
    pub fn builtin() -> Result<Self, EngineError> {
        let mut registry = Self::new();
        targets::tcp::register(&mut registry)?;
        Ok(registry)
    }

    /// Register a target subtype. Intended for startup only.
    ///
    /// Fails with [`EngineError::Config`] if `subtype` or `id_prefix` is
    /// already taken, if `id_prefix` is not lowercase ascii, or if the mask
    /// rules collide with the target base schema. A failed call leaves the
    /// registry unchanged.
    pub fn register(
        &mut self,
        subtype: &'static str,
        id_prefix: &'static str,
        mask_rules: MaskRules,
        build: AttributeBuilder,
        project: AttributeProjector,
    ) -> Result<(), EngineError> {
        if subtype.is_empty() {
            return Err(EngineError::Config("target subtype must not be empty".into()));
        }
        if self.entries.contains_key(subtype) {
            return Err(EngineError::Config(format!(
                "target subtype {subtype:?} is already registered"
            )));
        }
        if id_prefix.is_empty() || !id_prefix.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(EngineError::Config(format!(
                "id prefix {id_prefix:?} must be non-empty lowercase ascii"
            )));
        }
        if RESERVED_PREFIXES.contains(&id_prefix) || self.by_prefix(id_prefix).is_some() {
            return Err(EngineError::Config(format!(
                "id prefix {id_prefix:?} is already registered"
            )));
        }
        let schema = targets::base_schema()
            .and_then(|base| base.with_rules(&mask_rules))
            .map_err(|e| {
                EngineError::Config(format!(
                    "invalid mask rules for target subtype {subtype:?}: {e}"
                ))
            })?;
        self.entries.insert(
            subtype,
            SubtypeEntry {
                subtype,
                id_prefix,
                mask_rules,
                schema,
                build,
                project,
            },
        );
        Ok(())
    }

    pub fn get(&self, subtype: &str) -> Option<&SubtypeEntry> {
        self.entries.get(subtype)
    }

    pub fn by_prefix(&self, id_prefix: &str) -> Option<&SubtypeEntry> {
        self.entries.values().find(|e| e.id_prefix == id_prefix)
    }

    pub fn subtypes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::{Attributes, CreateOption, FieldErrors, FieldSpec, ValueKind};

    #[derive(Debug)]
    struct Nothing;

    impl Attributes for Nothing {
        fn validate(&self) -> FieldErrors {
            FieldErrors::new()
        }

        fn validate_for_update(&self, _mask: &[&str]) -> FieldErrors {
            FieldErrors::new()
        }

        fn creation_options(&self) -> Vec<CreateOption> {
            Vec::new()
        }
    }

    fn build(_: &AttributeMap) -> Box<dyn Attributes> {
        Box::new(Nothing)
    }

    fn project(_: &ResourceRecord) -> AttributeMap {
        AttributeMap::new()
    }

    fn rules() -> MaskRules {
        MaskRules::new(&[FieldSpec::mutable("attributes.path", "path", ValueKind::Text)]).unwrap()
    }

    fn assert_config_error(result: Result<(), EngineError>, needle: &str) {
        match result {
            Err(EngineError::Config(message)) => assert!(message.contains(needle), "{message}"),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn builtin_knows_tcp() {
        let registry = AttributeRegistry::builtin().unwrap();
        let tcp = registry.get("tcp").unwrap();
        assert_eq!(tcp.id_prefix(), "ttcp");
        assert!(tcp.schema().resolve("attributes.default_port").is_some());
        assert!(tcp.schema().resolve("name").is_some());
        assert!(registry.by_prefix("ttcp").is_some());
        assert!(registry.get("ssh").is_none());
    }

    #[test]
    fn registers_new_subtype() {
        let mut registry = AttributeRegistry::builtin().unwrap();
        registry.register("unix", "tunx", rules(), build, project).unwrap();
        assert_eq!(registry.subtypes().collect::<Vec<_>>(), vec!["tcp", "unix"]);
    }

    #[test]
    fn duplicate_subtype_rejected() {
        let mut registry = AttributeRegistry::builtin().unwrap();
        let result = registry.register("tcp", "tother", rules(), build, project);
        assert_config_error(result, "already registered");
        assert!(registry.by_prefix("tother").is_none());
    }

    #[test]
    fn duplicate_prefix_rejected() {
        let mut registry = AttributeRegistry::builtin().unwrap();
        let result = registry.register("other", "ttcp", rules(), build, project);
        assert_config_error(result, "already registered");
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn prefixes_of_other_resources_are_reserved() {
        let mut registry = AttributeRegistry::new();
        for prefix in [host_sets::ID_PREFIX, authtoken::ID_PREFIX] {
            let result = registry.register("other", prefix, rules(), build, project);
            assert_config_error(result, "already registered");
        }
        assert_eq!(registry.subtypes().count(), 0);
    }

    #[test]
    fn malformed_prefix_rejected() {
        let mut registry = AttributeRegistry::new();
        for prefix in ["", "T_x", "tcp2", "t-x"] {
            let result = registry.register("other", prefix, rules(), build, project);
            assert_config_error(result, "lowercase ascii");
        }
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn colliding_column_rejected() {
        let mut registry = AttributeRegistry::new();
        let spec = FieldSpec::mutable("attributes.name", "name", ValueKind::Text);
        let rules = MaskRules::new(&[spec]).unwrap();
        let result = registry.register("bad", "tbad", rules, build, project);
        assert_config_error(result, "invalid mask rules");
        assert!(registry.get("bad").is_none());
    }
}
