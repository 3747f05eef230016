pub mod authtoken;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host_sets;
pub mod kms;
pub mod membership;
mod occ;
pub mod registry;
pub mod resource;
pub mod targets;

pub use authtoken::{AuthToken, AuthTokenStatus};
pub use config::{ControllerConfig, StorageConfig};
pub use envelope::EnvelopeCodec;
pub use error::{EngineError, ErrorKind};
pub use kms::{KeyProvider, KeyPurpose, ScopedKeyProvider, Wrapper};
pub use membership::MembershipOp;
pub use registry::{AttributeProjector, AttributeRegistry, SubtypeEntry};
pub use resource::Resource;

use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use portcullis_core::crypto::RootKey;
use portcullis_core::mask::{MaskOp, compute_mask};
use portcullis_core::{FieldDelta, FieldMask, OpContext, PublicId, Schema, ScopeId, VersionSpec};
use portcullis_storage::{
    KeyStore, ResourceRecord, ResourceType, SqliteStorage, Storage, StoredDelta,
};
use tracing::{debug, info};

use crate::occ::VersionGate;

/// Single entry point for resource mutations.
///
/// Holds no locks of its own: every write is one conditional update in
/// storage, and concurrent callers race on that alone.
pub struct Controller {
    storage: Arc<dyn Storage>,
    keys: Arc<ScopedKeyProvider>,
    codec: EnvelopeCodec,
    registry: AttributeRegistry,
    host_set_schema: Schema,
    auth_token_schema: Schema,
    config: ControllerConfig,
}

impl Controller {
    pub fn new<S>(
        store: Arc<S>,
        root_key: RootKey,
        registry: AttributeRegistry,
        config: ControllerConfig,
    ) -> Result<Self, EngineError>
    where
        S: Storage + KeyStore + 'static,
    {
        config.validate()?;
        let keys = Arc::new(ScopedKeyProvider::new(root_key, store.clone()));
        let codec = EnvelopeCodec::new(keys.clone());
        Ok(Self {
            storage: store,
            keys,
            codec,
            registry,
            host_set_schema: host_sets::schema()?,
            auth_token_schema: authtoken::schema()?,
            config,
        })
    }

    /// Open the sqlite store named by `config` with the built-in subtypes.
    pub fn open(config: ControllerConfig, root_key: RootKey) -> Result<Self, EngineError> {
        let storage = match &config.storage.path {
            Some(path) => SqliteStorage::open(path)?,
            None => SqliteStorage::open_in_memory()?,
        };
        storage.set_busy_timeout(config.storage.busy_timeout())?;
        info!(path = ?config.storage.path, "opened controller store");
        let registry = AttributeRegistry::builtin()?;
        Self::new(Arc::new(storage), root_key, registry, config)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn keys(&self) -> &ScopedKeyProvider {
        &self.keys
    }

    pub fn envelope(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    /// Parse a caller-supplied id, mapping malformed input to `InvalidArgument`.
    pub fn parse_id(id: &str) -> Result<PublicId, EngineError> {
        if id.is_empty() {
            return Err(EngineError::invalid_field("id", "Missing id."));
        }
        PublicId::parse(id).map_err(|e| EngineError::invalid_field("id", &e.to_string()))
    }

    pub fn provision_scope(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
    ) -> Result<(), EngineError> {
        self.keys.provision_scope(ctx, scope_id)
    }

    fn gate(&self) -> VersionGate<'_> {
        VersionGate::new(self.storage.as_ref(), self.config.automatic_versioning)
    }

    fn schema_for(
        &self,
        record: &ResourceRecord,
    ) -> Result<(&Schema, Option<&SubtypeEntry>), EngineError> {
        match record.resource_type {
            ResourceType::Target => {
                let subtype = record.subtype.as_deref().unwrap_or_default();
                let entry = self.registry.get(subtype).ok_or_else(|| {
                    EngineError::Internal(format!(
                        "target {} has unregistered subtype {subtype:?}",
                        record.id
                    ))
                })?;
                Ok((entry.schema(), Some(entry)))
            }
            ResourceType::HostSet => Ok((&self.host_set_schema, None)),
            ResourceType::AuthToken => Ok((&self.auth_token_schema, None)),
        }
    }

    fn view(&self, record: ResourceRecord) -> Result<Resource, EngineError> {
        let (schema, entry) = self.schema_for(&record)?;
        Ok(Resource::project(record, schema, entry))
    }

    // =========================================================================
    // Create / read
    // =========================================================================

    /// Create a target of a registered subtype. `input` may set plain fields
    /// and `attributes.*`; the subtype's creation options are applied on top.
    pub fn create(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        subtype: &str,
        input: &FieldDelta,
    ) -> Result<Resource, EngineError> {
        ctx.check()?;
        let entry = self
            .registry
            .get(subtype)
            .ok_or_else(|| EngineError::invalid_field("type", "Unknown target type."))?;
        let mask = compute_mask(entry.schema(), input, MaskOp::Create, Some(entry.builder()))?;
        let attributes = (entry.builder())(&mask.attribute_values());

        let id = PublicId::generate(entry.id_prefix())?;
        let mut record = ResourceRecord::new(
            id,
            scope_id.clone(),
            ResourceType::Target,
            Some(subtype.to_string()),
        );
        write_fields(&mut record, &mask);
        for option in attributes.creation_options() {
            targets::apply_create_option(&mut record, option);
        }

        ctx.check()?;
        let created = self.storage.create(&record)?;
        info!(id = %created.id, scope_id = %scope_id, subtype, "created target");
        self.view(created)
    }

    pub fn create_host_set(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        input: &FieldDelta,
    ) -> Result<Resource, EngineError> {
        ctx.check()?;
        let mask = compute_mask(&self.host_set_schema, input, MaskOp::Create, None)?;
        let id = PublicId::generate(host_sets::ID_PREFIX)?;
        let mut record = ResourceRecord::new(id, scope_id.clone(), ResourceType::HostSet, None);
        write_fields(&mut record, &mask);

        ctx.check()?;
        let created = self.storage.create(&record)?;
        info!(id = %created.id, scope_id = %scope_id, "created host set");
        self.view(created)
    }

    pub fn read(&self, ctx: &OpContext, id: &PublicId) -> Result<Resource, EngineError> {
        ctx.check()?;
        let record = self
            .storage
            .read(id)?
            .ok_or_else(|| EngineError::not_found(id))?;
        self.view(record)
    }

    pub fn list(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        resource_type: ResourceType,
    ) -> Result<Vec<Resource>, EngineError> {
        let mut out = Vec::new();
        for id in self.storage.list_ids(scope_id, resource_type)? {
            ctx.check()?;
            // Deleted between listing and reading.
            if let Some(record) = self.storage.read(&id)? {
                out.push(self.view(record)?);
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Update / delete
    // =========================================================================

    /// Apply a sparse field delta. Every violation in the delta is reported
    /// together in `InvalidArgument`'s field map.
    pub fn update(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: VersionSpec,
        delta: &FieldDelta,
    ) -> Result<Resource, EngineError> {
        let record = self.gate().mutate(ctx, id, version, |current| {
            let (schema, entry) = self.schema_for(current)?;
            let builder = entry.map(SubtypeEntry::builder);
            let mask = compute_mask(schema, delta, MaskOp::Update, builder)?;
            if current.resource_type == ResourceType::AuthToken {
                authtoken::check_mask(&mask)?;
            }
            Ok(stored_delta(&mask))
        })?;
        debug!(id = %id, version = record.version, "updated resource");
        self.view(record)
    }

    /// Returns the number of resources removed; an unknown id removes nothing.
    pub fn delete(&self, ctx: &OpContext, id: &PublicId) -> Result<usize, EngineError> {
        ctx.check()?;
        let deleted = self.storage.delete(id, None)?;
        info!(id = %id, deleted, "deleted resource");
        Ok(deleted)
    }

    /// Delete only if the stored version is still `version`.
    pub fn delete_at_version(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: NonZeroU32,
    ) -> Result<usize, EngineError> {
        ctx.check()?;
        let expected = version.get();
        let deleted = self.storage.delete(id, Some(expected))?;
        if deleted == 0 {
            if let Some(current) = self.storage.read(id)? {
                debug!(id = %id, expected, current = current.version, "stale delete");
                return Err(EngineError::VersionConflict {
                    id: id.clone(),
                    expected,
                    current: current.version,
                });
            }
        }
        info!(id = %id, deleted, "deleted resource");
        Ok(deleted)
    }

    // =========================================================================
    // Memberships
    // =========================================================================

    pub fn add_members(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: VersionSpec,
        host_set_ids: &[PublicId],
    ) -> Result<Resource, EngineError> {
        self.change_members(ctx, id, version, MembershipOp::Add, host_set_ids)
    }

    /// Replace the membership set; an empty list clears it.
    pub fn set_members(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: VersionSpec,
        host_set_ids: &[PublicId],
    ) -> Result<Resource, EngineError> {
        self.change_members(ctx, id, version, MembershipOp::Set, host_set_ids)
    }

    /// Ids that are not members are ignored; the version still advances.
    pub fn remove_members(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: VersionSpec,
        host_set_ids: &[PublicId],
    ) -> Result<Resource, EngineError> {
        self.change_members(ctx, id, version, MembershipOp::Remove, host_set_ids)
    }

    fn change_members(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        version: VersionSpec,
        op: MembershipOp,
        host_set_ids: &[PublicId],
    ) -> Result<Resource, EngineError> {
        if host_set_ids.is_empty() && op != MembershipOp::Set {
            return Err(EngineError::invalid_field(
                targets::HOST_SET_IDS,
                "Must contain at least one host set id.",
            ));
        }
        let wanted: BTreeSet<PublicId> = host_set_ids.iter().cloned().collect();

        let record = self.gate().mutate(ctx, id, version, |current| {
            if current.resource_type != ResourceType::Target {
                return Err(EngineError::invalid(format!(
                    "{} resources have no host set memberships",
                    current.resource_type.as_str()
                )));
            }
            if op.requires_existing() {
                for host_set_id in &wanted {
                    ctx.check()?;
                    match self.storage.read(host_set_id)? {
                        Some(r) if r.resource_type == ResourceType::HostSet => {}
                        _ => return Err(EngineError::not_found(host_set_id)),
                    }
                }
            }
            Ok(StoredDelta {
                members: Some(op.apply(&current.members, &wanted)),
                ..Default::default()
            })
        })?;

        info!(
            id = %id,
            op = op.as_str(),
            version = record.version,
            members = record.members.len(),
            "changed memberships"
        );
        self.view(record)
    }
}

fn write_fields(record: &mut ResourceRecord, mask: &FieldMask) {
    for (path, value) in mask.values() {
        record.fields.insert(path.column().to_string(), value.clone());
    }
}

fn stored_delta(mask: &FieldMask) -> StoredDelta {
    StoredDelta {
        set: mask
            .values()
            .map(|(path, value)| (path.column().to_string(), value.clone()))
            .collect(),
        clear: mask.null_paths().map(|path| path.column().to_string()).collect(),
        ..Default::default()
    }
}
