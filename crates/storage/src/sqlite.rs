use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use portcullis_core::{FieldValue, PublicId, ScopeId, time::physical_now};

use crate::error::StorageError;
use crate::traits::{
    CasOutcome, KeyStore, KeyVersionRecord, ResourceRecord, ResourceType, SealedField, Storage,
    StoredDelta,
};

fn to_version(v: i64, label: &str) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {label}: {v}")))
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// SQLite-backed resource and key store. One connection, guarded by a mutex;
/// every write runs in an immediate transaction.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StorageError> {
        self.lock()?.busy_timeout(timeout)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn read_record(conn: &Connection, id: &PublicId) -> Result<Option<ResourceRecord>, StorageError> {
    let row = conn
        .query_row(
            "SELECT resource_type, subtype, scope_id, version, created_at, updated_at FROM resources WHERE resource_id = ?1",
            rusqlite::params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((resource_type, subtype, scope_id, version, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut fields = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT field_key, value FROM fields WHERE resource_id = ?1")?;
    let rows = stmt.query_map(rusqlite::params![id.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (key, val_bytes) = row?;
        let value = FieldValue::from_msgpack(&val_bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fields.insert(key, value);
    }

    let mut sealed = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT field_key, ciphertext, key_scope, purpose, key_version FROM sealed_fields WHERE resource_id = ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![id.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    for row in rows {
        let (key, ciphertext, key_scope, purpose, key_version) = row?;
        sealed.insert(
            key,
            SealedField {
                ciphertext,
                scope_id: ScopeId::parse(&key_scope)?,
                purpose,
                key_version: to_version(key_version, "key_version")?,
            },
        );
    }

    let mut members = BTreeSet::new();
    let mut stmt = conn.prepare("SELECT member_id FROM memberships WHERE resource_id = ?1")?;
    let rows = stmt.query_map(rusqlite::params![id.as_str()], |row| row.get::<_, String>(0))?;
    for row in rows {
        members.insert(PublicId::parse(&row?)?);
    }

    Ok(Some(ResourceRecord {
        id: id.clone(),
        scope_id: ScopeId::parse(&scope_id)?,
        resource_type: ResourceType::parse(&resource_type)?,
        subtype,
        version: to_version(version, "version")?,
        created_time: created_at,
        updated_time: updated_at,
        fields,
        sealed,
        members,
    }))
}

fn upsert_field(
    tx: &rusqlite::Transaction,
    id: &PublicId,
    key: &str,
    value: &FieldValue,
) -> Result<(), StorageError> {
    let value_bytes = value
        .to_msgpack()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    tx.execute(
        "INSERT INTO fields (resource_id, field_key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(resource_id, field_key) DO UPDATE SET value = excluded.value",
        rusqlite::params![id.as_str(), key, value_bytes],
    )?;
    Ok(())
}

fn upsert_sealed(
    tx: &rusqlite::Transaction,
    id: &PublicId,
    key: &str,
    sealed: &SealedField,
) -> Result<(), StorageError> {
    tx.execute(
        "INSERT INTO sealed_fields (resource_id, field_key, ciphertext, key_scope, purpose, key_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(resource_id, field_key) DO UPDATE SET ciphertext = excluded.ciphertext, key_scope = excluded.key_scope, purpose = excluded.purpose, key_version = excluded.key_version",
        rusqlite::params![
            id.as_str(),
            key,
            sealed.ciphertext,
            sealed.scope_id.as_str(),
            sealed.purpose,
            sealed.key_version as i64,
        ],
    )?;
    Ok(())
}

fn insert_members(
    tx: &rusqlite::Transaction,
    id: &PublicId,
    members: &BTreeSet<PublicId>,
) -> Result<(), StorageError> {
    for member in members {
        tx.execute(
            "INSERT INTO memberships (resource_id, member_id) VALUES (?1, ?2)",
            rusqlite::params![id.as_str(), member.as_str()],
        )
        .map_err(|e| {
            if is_constraint(&e) {
                StorageError::UnknownMember {
                    id: member.to_string(),
                }
            } else {
                StorageError::Sqlite(e)
            }
        })?;
    }
    Ok(())
}

impl Storage for SqliteStorage {
    fn create(&self, record: &ResourceRecord) -> Result<ResourceRecord, StorageError> {
        let now = physical_now()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = tx.execute(
            "INSERT INTO resources (resource_id, resource_type, subtype, scope_id, version, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            rusqlite::params![
                record.id.as_str(),
                record.resource_type.as_str(),
                record.subtype.as_deref(),
                record.scope_id.as_str(),
                now,
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint(&e) => {
                return Err(StorageError::DuplicateId {
                    id: record.id.to_string(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }

        for (key, value) in &record.fields {
            upsert_field(&tx, &record.id, key, value)?;
        }
        for (key, sealed) in &record.sealed {
            upsert_sealed(&tx, &record.id, key, sealed)?;
        }
        insert_members(&tx, &record.id, &record.members)?;

        let stored = read_record(&tx, &record.id)?
            .ok_or_else(|| StorageError::ConstraintViolation(format!("{} vanished", record.id)))?;
        tx.commit()?;
        Ok(stored)
    }

    fn read(&self, id: &PublicId) -> Result<Option<ResourceRecord>, StorageError> {
        let conn = self.lock()?;
        read_record(&conn, id)
    }

    fn conditional_update(
        &self,
        id: &PublicId,
        expected_version: u32,
        delta: &StoredDelta,
    ) -> Result<CasOutcome, StorageError> {
        let now = physical_now()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE resources SET version = version + 1, updated_at = MAX(updated_at, ?1)
             WHERE resource_id = ?2 AND version = ?3",
            rusqlite::params![now, id.as_str(), expected_version as i64],
        )?;

        if changed == 0 {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT version FROM resources WHERE resource_id = ?1",
                    rusqlite::params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            // dropping the transaction rolls back
            return match current {
                Some(v) => Ok(CasOutcome::Conflict {
                    current_version: to_version(v, "version")?,
                }),
                None => Ok(CasOutcome::Missing),
            };
        }

        for (key, value) in &delta.set {
            upsert_field(&tx, id, key, value)?;
        }
        for key in &delta.clear {
            tx.execute(
                "DELETE FROM fields WHERE resource_id = ?1 AND field_key = ?2",
                rusqlite::params![id.as_str(), key],
            )?;
        }
        for (key, sealed) in &delta.seal {
            upsert_sealed(&tx, id, key, sealed)?;
        }
        if let Some(members) = &delta.members {
            tx.execute(
                "DELETE FROM memberships WHERE resource_id = ?1",
                rusqlite::params![id.as_str()],
            )?;
            insert_members(&tx, id, members)?;
        }

        let record = read_record(&tx, id)?
            .ok_or_else(|| StorageError::ConstraintViolation(format!("{id} vanished")))?;
        tx.commit()?;
        Ok(CasOutcome::Applied(record))
    }

    fn delete(&self, id: &PublicId, expected_version: Option<u32>) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count = match expected_version {
            Some(v) => conn.execute(
                "DELETE FROM resources WHERE resource_id = ?1 AND version = ?2",
                rusqlite::params![id.as_str(), v as i64],
            )?,
            None => conn.execute(
                "DELETE FROM resources WHERE resource_id = ?1",
                rusqlite::params![id.as_str()],
            )?,
        };
        Ok(count)
    }

    fn list_ids(
        &self,
        scope_id: &ScopeId,
        resource_type: ResourceType,
    ) -> Result<Vec<PublicId>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT resource_id FROM resources WHERE scope_id = ?1 AND resource_type = ?2 ORDER BY resource_id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![scope_id.as_str(), resource_type.as_str()],
            |row| row.get::<_, String>(0),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(PublicId::parse(&row?)?);
        }
        Ok(result)
    }
}

fn read_key_version(row: &rusqlite::Row) -> rusqlite::Result<(String, String, i64, Vec<u8>, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn to_key_record(
    (scope_id, purpose, version, wrapped_key, created_at): (String, String, i64, Vec<u8>, i64),
) -> Result<KeyVersionRecord, StorageError> {
    Ok(KeyVersionRecord {
        scope_id: ScopeId::parse(&scope_id)?,
        purpose,
        version: to_version(version, "key version")?,
        wrapped_key,
        created_time: created_at,
    })
}

impl KeyStore for SqliteStorage {
    fn append_key_version(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
        wrap: &mut dyn FnMut(u32) -> Result<Vec<u8>, portcullis_core::CoreError>,
    ) -> Result<KeyVersionRecord, StorageError> {
        let now = physical_now()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let newest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM key_versions WHERE scope_id = ?1 AND purpose = ?2",
            rusqlite::params![scope_id.as_str(), purpose],
            |row| row.get(0),
        )?;
        let version = to_version(newest + 1, "key version")?;
        let wrapped_key = wrap(version)?;

        tx.execute(
            "INSERT INTO key_versions (scope_id, purpose, version, wrapped_key, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![scope_id.as_str(), purpose, version as i64, wrapped_key, now],
        )?;
        tx.commit()?;

        Ok(KeyVersionRecord {
            scope_id: scope_id.clone(),
            purpose: purpose.to_string(),
            version,
            wrapped_key,
            created_time: now,
        })
    }

    fn key_version(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
        version: u32,
    ) -> Result<Option<KeyVersionRecord>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT scope_id, purpose, version, wrapped_key, created_at FROM key_versions WHERE scope_id = ?1 AND purpose = ?2 AND version = ?3",
                rusqlite::params![scope_id.as_str(), purpose, version as i64],
                read_key_version,
            )
            .optional()?;
        row.map(to_key_record).transpose()
    }

    fn key_versions(
        &self,
        scope_id: &ScopeId,
        purpose: &str,
    ) -> Result<Vec<KeyVersionRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT scope_id, purpose, version, wrapped_key, created_at FROM key_versions WHERE scope_id = ?1 AND purpose = ?2 ORDER BY version DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![scope_id.as_str(), purpose], read_key_version)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(to_key_record(row?)?);
        }
        Ok(result)
    }
}
