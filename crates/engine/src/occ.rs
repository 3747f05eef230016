//! Optimistic concurrency gate.
//!
//! Every mutation names the version it was computed against. The write is a
//! single compare-and-swap in storage; a mismatch surfaces as
//! [`EngineError::VersionConflict`] and is never retried here.

use portcullis_core::{OpContext, PublicId, VersionSpec};
use portcullis_storage::{CasOutcome, ResourceRecord, Storage, StoredDelta};
use tracing::debug;

use crate::error::EngineError;

pub(crate) struct VersionGate<'a> {
    storage: &'a dyn Storage,
    automatic: bool,
}

impl<'a> VersionGate<'a> {
    pub(crate) fn new(storage: &'a dyn Storage, automatic: bool) -> Self {
        Self { storage, automatic }
    }

    /// Read the resource and settle the version the write is conditioned on.
    pub(crate) fn begin(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        spec: VersionSpec,
    ) -> Result<(ResourceRecord, u32), EngineError> {
        ctx.check()?;
        let explicit = match spec {
            VersionSpec::Explicit(v) => Some(v.get()),
            VersionSpec::Auto if self.automatic => None,
            VersionSpec::Auto => {
                return Err(EngineError::invalid(
                    "no version supplied and automatic versioning is disabled",
                ));
            }
        };

        let current = self
            .storage
            .read(id)?
            .ok_or_else(|| EngineError::not_found(id))?;
        match explicit {
            Some(expected) if expected != current.version => {
                debug!(id = %id, expected, current = current.version, "stale version");
                Err(EngineError::VersionConflict {
                    id: id.clone(),
                    expected,
                    current: current.version,
                })
            }
            Some(expected) => Ok((current, expected)),
            None => {
                let expected = current.version;
                Ok((current, expected))
            }
        }
    }

    pub(crate) fn commit(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        expected: u32,
        delta: &StoredDelta,
    ) -> Result<ResourceRecord, EngineError> {
        ctx.check()?;
        let outcome = self
            .storage
            .conditional_update(id, expected, delta)
            .map_err(EngineError::from_write)?;
        match outcome {
            CasOutcome::Applied(record) => {
                debug!(id = %id, version = record.version, "applied conditional write");
                Ok(record)
            }
            CasOutcome::Conflict { current_version } => {
                debug!(
                    id = %id,
                    expected,
                    current = current_version,
                    "lost conditional write"
                );
                Err(EngineError::VersionConflict {
                    id: id.clone(),
                    expected,
                    current: current_version,
                })
            }
            CasOutcome::Missing => Err(EngineError::not_found(id)),
        }
    }

    /// `begin`, build the delta from the record that was read, then `commit`.
    pub(crate) fn mutate<F>(
        &self,
        ctx: &OpContext,
        id: &PublicId,
        spec: VersionSpec,
        build: F,
    ) -> Result<ResourceRecord, EngineError>
    where
        F: FnOnce(&ResourceRecord) -> Result<StoredDelta, EngineError>,
    {
        let (current, expected) = self.begin(ctx, id, spec)?;
        let delta = build(&current)?;
        self.commit(ctx, id, expected, &delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_core::{FieldValue, ScopeId};
    use portcullis_storage::{ResourceType, SqliteStorage};

    fn seeded() -> (SqliteStorage, PublicId) {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let id = PublicId::generate("hsst").unwrap();
        let record = ResourceRecord::new(
            id.clone(),
            ScopeId::global(),
            ResourceType::HostSet,
            None,
        );
        storage.create(&record).unwrap();
        (storage, id)
    }

    fn rename(name: &str) -> StoredDelta {
        StoredDelta {
            set: vec![("name".into(), FieldValue::from(name))],
            ..Default::default()
        }
    }

    #[test]
    fn explicit_version_applies_once() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, true);
        let ctx = OpContext::new();
        let v1 = VersionSpec::explicit(1).unwrap();

        let updated = gate.mutate(&ctx, &id, v1, |_| Ok(rename("a"))).unwrap();
        assert_eq!(updated.version, 2);

        let err = gate.mutate(&ctx, &id, v1, |_| Ok(rename("b"))).unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { expected: 1, current: 2, .. }));
        assert_eq!(storage.read(&id).unwrap().unwrap().field("name"), Some(&FieldValue::from("a")));
    }

    #[test]
    fn auto_uses_the_read_version() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, true);
        let ctx = OpContext::new();
        gate.mutate(&ctx, &id, VersionSpec::Auto, |_| Ok(rename("a"))).unwrap();
        let record = gate.mutate(&ctx, &id, VersionSpec::Auto, |_| Ok(rename("b"))).unwrap();
        assert_eq!(record.version, 3);
    }

    #[test]
    fn auto_rejected_when_disabled() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, false);
        let err = gate
            .mutate(&OpContext::new(), &id, VersionSpec::Auto, |_| Ok(rename("a")))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
        assert_eq!(storage.read(&id).unwrap().unwrap().version, 1);
    }

    #[test]
    fn commit_detects_interleaved_write() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, true);
        let ctx = OpContext::new();

        let (_, expected) = gate.begin(&ctx, &id, VersionSpec::Auto).unwrap();
        gate.commit(&ctx, &id, expected, &rename("first")).unwrap();
        let err = gate.commit(&ctx, &id, expected, &rename("second")).unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { expected: 1, current: 2, .. }));
    }

    #[test]
    fn missing_resource() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let gate = VersionGate::new(&storage, true);
        let id = PublicId::generate("hsst").unwrap();
        let err = gate
            .mutate(&OpContext::new(), &id, VersionSpec::Auto, |_| Ok(rename("a")))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn vanished_member_is_not_found() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, true);
        let ghost = PublicId::generate("hsst").unwrap();
        let delta = StoredDelta {
            members: Some([ghost.clone()].into_iter().collect()),
            ..Default::default()
        };
        let err = gate.commit(&OpContext::new(), &id, 1, &delta).unwrap_err();
        match err {
            EngineError::NotFound { id } => assert_eq!(id, ghost.to_string()),
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(storage.read(&id).unwrap().unwrap().version, 1);
    }

    #[test]
    fn canceled_before_commit_writes_nothing() {
        let (storage, id) = seeded();
        let gate = VersionGate::new(&storage, true);
        let ctx = OpContext::new();
        let err = gate
            .mutate(&ctx, &id, VersionSpec::Auto, |_| {
                ctx.cancel();
                Ok(rename("late"))
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Canceled(_)));
        assert_eq!(storage.read(&id).unwrap().unwrap().version, 1);
    }
}
