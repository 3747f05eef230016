use std::collections::{BTreeMap, BTreeSet};

use portcullis_core::{CoreError, FieldValue, PublicId, ScopeId};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Target,
    HostSet,
    AuthToken,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::HostSet => "host_set",
            Self::AuthToken => "auth_token",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "target" => Ok(Self::Target),
            "host_set" => Ok(Self::HostSet),
            "auth_token" => Ok(Self::AuthToken),
            _ => Err(StorageError::Serialization(format!("unknown resource type: {s}"))),
        }
    }
}

/// A value that is only ever stored encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    pub ciphertext: Vec<u8>,
    pub scope_id: ScopeId,
    pub purpose: String,
    pub key_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: PublicId,
    pub scope_id: ScopeId,
    pub resource_type: ResourceType,
    pub subtype: Option<String>,
    pub version: u32,
    pub created_time: i64,
    pub updated_time: i64,
    /// Plain columns keyed by column name.
    pub fields: BTreeMap<String, FieldValue>,
    pub sealed: BTreeMap<String, SealedField>,
    pub members: BTreeSet<PublicId>,
}

impl ResourceRecord {
    /// A record ready for [`Storage::create`]; version and timestamps are
    /// assigned by the store.
    pub fn new(
        id: PublicId,
        scope_id: ScopeId,
        resource_type: ResourceType,
        subtype: Option<String>,
    ) -> Self {
        Self {
            id,
            scope_id,
            resource_type,
            subtype,
            version: 1,
            created_time: 0,
            updated_time: 0,
            fields: BTreeMap::new(),
            sealed: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }

    pub fn field(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }
}

/// Column-level changes applied by one conditional write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDelta {
    pub set: Vec<(String, FieldValue)>,
    pub clear: Vec<String>,
    pub seal: Vec<(String, SealedField)>,
    /// Replacement membership set, when memberships change.
    pub members: Option<BTreeSet<PublicId>>,
}

impl StoredDelta {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.clear.is_empty()
            && self.seal.is_empty()
            && self.members.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write committed; the record reflects the new version.
    Applied(ResourceRecord),
    /// Stored version differed from the expected one. Nothing was written.
    Conflict { current_version: u32 },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersionRecord {
    pub scope_id: ScopeId,
    pub purpose: String,
    pub version: u32,
    /// Data key sealed under the root wrapping key.
    pub wrapped_key: Vec<u8>,
    pub created_time: i64,
}

pub trait Storage: Send + Sync {
    /// Insert a new resource at version 1. Fails with
    /// [`StorageError::DuplicateId`] when the id is taken.
    fn create(&self, record: &ResourceRecord) -> Result<ResourceRecord, StorageError>;

    fn read(&self, id: &PublicId) -> Result<Option<ResourceRecord>, StorageError>;

    /// Apply `delta` and bump the version by one, only if the stored version
    /// equals `expected_version`.
    /// A membership naming a missing resource fails with
    /// [`StorageError::UnknownMember`] and writes nothing.
    fn conditional_update(
        &self,
        id: &PublicId,
        expected_version: u32,
        delta: &StoredDelta,
    ) -> Result<CasOutcome, StorageError>;

    /// Remove the resource with its fields and membership edges. With
    /// `expected_version`, only a resource at that version is removed.
    fn delete(&self, id: &PublicId, expected_version: Option<u32>) -> Result<usize, StorageError>;

    fn list_ids(
        &self,
        scope_id: &ScopeId,
        resource_type: ResourceType,
    ) -> Result<Vec<PublicId>, StorageError>;
}

pub trait KeyStore: Send + Sync {
    /// Mint the next version for `(scope_id, purpose)`. `wrap` receives the
    /// version number and returns the wrapped key to store; the store
    /// serializes concurrent appends.
    fn append_key_version(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
        wrap: &mut dyn FnMut(u32) -> Result<Vec<u8>, CoreError>,
    ) -> Result<KeyVersionRecord, StorageError>;

    fn key_version(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
        version: u32,
    ) -> Result<Option<KeyVersionRecord>, StorageError>;

    /// All retained versions, newest first.
    fn key_versions(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
    ) -> Result<Vec<KeyVersionRecord>, StorageError>;
}
