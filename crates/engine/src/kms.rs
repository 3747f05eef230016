//! Scoped key provider.
//!
//! Every scope owns one append-only list of data keys per [`KeyPurpose`].
//! Data keys are stored wrapped by a key derived from the controller's
//! [`RootKey`]; a [`Wrapper`] is the unwrapped, ready-to-use form of one
//! version. Rotation appends a version and never touches older ones, so
//! values sealed under any earlier version stay readable.

use std::fmt;
use std::sync::Arc;

use portcullis_core::crypto::{DataKey, RootKey};
use portcullis_core::{CoreError, OpContext, ScopeId};
use portcullis_storage::{KeyStore, KeyVersionRecord};
use tracing::{debug, info};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPurpose {
    /// Sensitive resource columns.
    Database,
    /// Auth token values.
    Tokens,
}

impl KeyPurpose {
    pub const ALL: [KeyPurpose; 2] = [KeyPurpose::Database, KeyPurpose::Tokens];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Tokens => "tokens",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "database" => Some(Self::Database),
            "tokens" => Some(Self::Tokens),
            _ => None,
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unwrapped key version, bound to its scope and purpose.
pub struct Wrapper {
    scope_id: ScopeId,
    purpose: KeyPurpose,
    version: u32,
    key: DataKey,
}

impl Wrapper {
    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Associated data binding ciphertext to this key's identity.
    pub fn aad(&self) -> Vec<u8> {
        key_aad(&self.scope_id, self.purpose, self.version)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.key.seal(plaintext, &self.aad())
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.key.open(sealed, &self.aad())
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("scope_id", &self.scope_id)
            .field("purpose", &self.purpose)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn key_aad(scope_id: &ScopeId, purpose: KeyPurpose, version: u32) -> Vec<u8> {
    format!("{scope_id}|{purpose}|{version}").into_bytes()
}

pub trait KeyProvider: Send + Sync {
    /// Resolve a wrapper for `(scope_id, purpose)`. `None` selects the newest
    /// version.
    fn resolve_wrapper(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        purpose: KeyPurpose,
        version: Option<u32>,
    ) -> Result<Arc<Wrapper>, EngineError>;
}

pub struct ScopedKeyProvider {
    root: RootKey,
    store: Arc<dyn KeyStore>,
}

impl ScopedKeyProvider {
    pub fn new(root: RootKey, store: Arc<dyn KeyStore>) -> Self {
        Self { root, store }
    }

    /// Mint version 1 of every purpose the scope does not have yet.
    pub fn provision_scope(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
    ) -> Result<(), EngineError> {
        for purpose in KeyPurpose::ALL {
            ctx.check()?;
            if self.store.key_versions(scope_id, purpose.as_str())?.is_empty() {
                let record = self.mint(scope_id, purpose)?;
                info!(
                    scope_id = %scope_id,
                    purpose = %purpose,
                    version = record.version,
                    "provisioned scope key"
                );
            }
        }
        Ok(())
    }

    /// Append a new key version; returns its number.
    pub fn rotate(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        purpose: KeyPurpose,
    ) -> Result<u32, EngineError> {
        ctx.check()?;
        let record = self.mint(scope_id, purpose)?;
        info!(
            scope_id = %scope_id,
            purpose = %purpose,
            version = record.version,
            "rotated scope key"
        );
        Ok(record.version)
    }

    /// Known versions, newest first.
    pub fn versions(
        &self,
        scope_id: &ScopeId,
        purpose: KeyPurpose,
    ) -> Result<Vec<u32>, EngineError> {
        Ok(self
            .store
            .key_versions(scope_id, purpose.as_str())?
            .into_iter()
            .map(|r| r.version)
            .collect())
    }

    fn mint(
        &self,
        scope_id: &ScopeId,
        purpose: KeyPurpose,
    ) -> Result<KeyVersionRecord, EngineError> {
        let wrapping = self.root.wrapping_key(purpose.as_str());
        let data_key = DataKey::generate()?;
        let record =
            self.store
                .append_key_version(scope_id, purpose.as_str(), &mut |version: u32| {
                    wrapping.seal(data_key.as_bytes(), &key_aad(scope_id, purpose, version))
                })?;
        Ok(record)
    }

    fn unwrap_record(
        &self,
        purpose: KeyPurpose,
        record: &KeyVersionRecord,
    ) -> Result<Wrapper, EngineError> {
        let wrapping = self.root.wrapping_key(purpose.as_str());
        let aad = key_aad(&record.scope_id, purpose, record.version);
        let raw = zeroize::Zeroizing::new(wrapping.open(&record.wrapped_key, &aad).map_err(|_| {
            EngineError::Internal(format!(
                "wrapped {purpose} key v{} for scope {} failed authentication",
                record.version, record.scope_id
            ))
        })?);
        Ok(Wrapper {
            scope_id: record.scope_id.clone(),
            purpose,
            version: record.version,
            key: DataKey::from_slice(&raw)?,
        })
    }
}

impl KeyProvider for ScopedKeyProvider {
    fn resolve_wrapper(
        &self,
        ctx: &OpContext,
        scope_id: &ScopeId,
        purpose: KeyPurpose,
        version: Option<u32>,
    ) -> Result<Arc<Wrapper>, EngineError> {
        ctx.check()?;
        let not_found = || EngineError::KeyNotFound {
            scope_id: scope_id.clone(),
            purpose: purpose.as_str().to_string(),
            version,
        };

        let record = match version {
            Some(v) => self
                .store
                .key_version(scope_id, purpose.as_str(), v)?
                .ok_or_else(not_found)?,
            None => {
                let mut versions = self
                    .store
                    .key_versions(scope_id, purpose.as_str())?
                    .into_iter();
                let newest = versions.next().ok_or_else(not_found)?;
                if versions.next().is_some_and(|next| next.version == newest.version) {
                    return Err(EngineError::Internal(format!(
                        "more than one newest {purpose} key for scope {scope_id}"
                    )));
                }
                newest
            }
        };

        debug!(
            scope_id = %scope_id,
            purpose = %purpose,
            version = record.version,
            "resolved key wrapper"
        );
        Ok(Arc::new(self.unwrap_record(purpose, &record)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_storage::{SqliteStorage, StorageError};

    fn provider() -> ScopedKeyProvider {
        let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
        ScopedKeyProvider::new(RootKey::generate().unwrap(), store)
    }

    #[test]
    fn provisioning_is_idempotent() {
        let keys = provider();
        let ctx = OpContext::new();
        let scope = ScopeId::new_project().unwrap();

        keys.provision_scope(&ctx, &scope).unwrap();
        keys.provision_scope(&ctx, &scope).unwrap();

        assert_eq!(keys.versions(&scope, KeyPurpose::Database).unwrap(), vec![1]);
        assert_eq!(keys.versions(&scope, KeyPurpose::Tokens).unwrap(), vec![1]);
    }

    #[test]
    fn newest_follows_rotation() {
        let keys = provider();
        let ctx = OpContext::new();
        let scope = ScopeId::new_org().unwrap();
        keys.provision_scope(&ctx, &scope).unwrap();

        assert_eq!(keys.rotate(&ctx, &scope, KeyPurpose::Database).unwrap(), 2);
        let newest = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, None).unwrap();
        assert_eq!(newest.version(), 2);

        let old = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, Some(1)).unwrap();
        assert_eq!(old.version(), 1);
        assert_eq!(keys.versions(&scope, KeyPurpose::Tokens).unwrap(), vec![1]);
    }

    #[test]
    fn unknown_version_is_key_not_found() {
        let keys = provider();
        let ctx = OpContext::new();
        let scope = ScopeId::new_project().unwrap();

        let err = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Tokens, None).unwrap_err();
        assert!(matches!(err, EngineError::KeyNotFound { version: None, .. }));

        keys.provision_scope(&ctx, &scope).unwrap();
        let err = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Tokens, Some(9)).unwrap_err();
        assert!(matches!(err, EngineError::KeyNotFound { version: Some(9), .. }));
    }

    #[test]
    fn wrappers_differ_across_scopes() {
        let keys = provider();
        let ctx = OpContext::new();
        let a = ScopeId::new_project().unwrap();
        let b = ScopeId::new_project().unwrap();
        keys.provision_scope(&ctx, &a).unwrap();
        keys.provision_scope(&ctx, &b).unwrap();

        let wa = keys.resolve_wrapper(&ctx, &a, KeyPurpose::Database, None).unwrap();
        let wb = keys.resolve_wrapper(&ctx, &b, KeyPurpose::Database, None).unwrap();
        let sealed = wa.seal(b"secret").unwrap();
        assert!(wb.open(&sealed).is_err());
        assert_eq!(wa.open(&sealed).unwrap(), b"secret");
    }

    #[test]
    fn different_root_cannot_unwrap() {
        let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let ctx = OpContext::new();
        let scope = ScopeId::new_project().unwrap();
        ScopedKeyProvider::new(RootKey::generate().unwrap(), store.clone())
            .provision_scope(&ctx, &scope)
            .unwrap();

        let other = ScopedKeyProvider::new(RootKey::generate().unwrap(), store);
        let err = other.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, None).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    /// Reports its newest record twice, as a store with a broken version
    /// sequence would.
    struct DuplicatedNewest(Arc<SqliteStorage>);

    impl KeyStore for DuplicatedNewest {
        fn append_key_version(
            &self,
            scope_id: &ScopeId,
            purpose: &str,
            wrap: &mut dyn FnMut(u32) -> Result<Vec<u8>, CoreError>,
        ) -> Result<KeyVersionRecord, StorageError> {
            self.0.append_key_version(scope_id, purpose, wrap)
        }

        fn key_version(
            &self,
            scope_id: &ScopeId,
            purpose: &str,
            version: u32,
        ) -> Result<Option<KeyVersionRecord>, StorageError> {
            self.0.key_version(scope_id, purpose, version)
        }

        fn key_versions(
            &self,
            scope_id: &ScopeId,
            purpose: &str,
        ) -> Result<Vec<KeyVersionRecord>, StorageError> {
            let mut records = self.0.key_versions(scope_id, purpose)?;
            if let Some(newest) = records.first().cloned() {
                records.insert(0, newest);
            }
            Ok(records)
        }
    }

    #[test]
    fn duplicate_newest_version_is_internal() {
        let store = DuplicatedNewest(Arc::new(SqliteStorage::open_in_memory().unwrap()));
        let keys = ScopedKeyProvider::new(RootKey::generate().unwrap(), Arc::new(store));
        let ctx = OpContext::new();
        let scope = ScopeId::new_project().unwrap();
        keys.provision_scope(&ctx, &scope).unwrap();

        let err = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, None).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));

        let pinned = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, Some(1)).unwrap();
        assert_eq!(pinned.version(), 1);
    }

    #[test]
    fn canceled_context_stops_resolution() {
        let keys = provider();
        let ctx = OpContext::new();
        let scope = ScopeId::new_project().unwrap();
        keys.provision_scope(&ctx, &scope).unwrap();

        ctx.cancel();
        let err = keys.resolve_wrapper(&ctx, &scope, KeyPurpose::Database, None).unwrap_err();
        assert!(matches!(err, EngineError::Canceled(_)));
    }
}
