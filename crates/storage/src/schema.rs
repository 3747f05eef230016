use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS resources (
    resource_id TEXT PRIMARY KEY,
    resource_type TEXT NOT NULL,
    subtype TEXT,
    scope_id TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL CHECK (updated_at >= created_at)
);
CREATE INDEX IF NOT EXISTS idx_resources_scope ON resources (scope_id, resource_type);

CREATE TABLE IF NOT EXISTS fields (
    resource_id TEXT NOT NULL REFERENCES resources (resource_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (resource_id, field_key)
);

CREATE TABLE IF NOT EXISTS sealed_fields (
    resource_id TEXT NOT NULL REFERENCES resources (resource_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL,
    ciphertext BLOB NOT NULL,
    key_scope TEXT NOT NULL,
    purpose TEXT NOT NULL,
    key_version INTEGER NOT NULL CHECK (key_version >= 1),
    PRIMARY KEY (resource_id, field_key)
);

CREATE TABLE IF NOT EXISTS memberships (
    resource_id TEXT NOT NULL REFERENCES resources (resource_id) ON DELETE CASCADE,
    member_id TEXT NOT NULL REFERENCES resources (resource_id) ON DELETE CASCADE,
    PRIMARY KEY (resource_id, member_id)
);
CREATE INDEX IF NOT EXISTS idx_memberships_member ON memberships (member_id);

CREATE TABLE IF NOT EXISTS key_versions (
    scope_id TEXT NOT NULL,
    purpose TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    wrapped_key BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (scope_id, purpose, version)
);
";
