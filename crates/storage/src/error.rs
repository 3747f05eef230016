use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("duplicate id: {id}")]
    DuplicateId { id: String },

    /// A membership names a resource that does not exist.
    #[error("unknown member: {id}")]
    UnknownMember { id: String },

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("core error: {0}")]
    Core(#[from] portcullis_core::CoreError),
}
