use portcullis_core::mask::MaskError;
use portcullis_core::{CoreError, FieldErrors, Interrupt, PublicId, ScopeId};
use portcullis_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid argument: {message}")]
    InvalidArgument {
        message: String,
        fields: FieldErrors,
    },

    #[error("version conflict on {id}: expected version {expected}, current version is {current}")]
    VersionConflict {
        id: PublicId,
        expected: u32,
        current: u32,
    },

    #[error("resource not found: {id}")]
    NotFound { id: String },

    #[error(
        "no {purpose} key for scope {scope_id} (version {})",
        .version.map_or_else(|| "newest".to_string(), |v| v.to_string())
    )]
    KeyNotFound {
        scope_id: ScopeId,
        purpose: String,
        version: Option<u32>,
    },

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("operation interrupted: {0:?}")]
    Canceled(Interrupt),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    VersionConflict,
    NotFound,
    KeyNotFound,
    DecryptionFailed,
    Canceled,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::Config(_) => ErrorKind::InvalidArgument,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::Canceled(_) => ErrorKind::Canceled,
            Self::Storage(_) | Self::Core(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Per-field messages for an invalid argument; empty otherwise.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::InvalidArgument { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            fields: FieldErrors::new(),
        }
    }

    pub(crate) fn invalid_field(path: &str, message: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(path.to_string(), message.to_string());
        Self::InvalidArgument {
            message: "invalid fields in request".into(),
            fields,
        }
    }

    pub(crate) fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Storage failures of a conditional write, with a vanished member
    /// reported as `NotFound` rather than `Internal`.
    pub(crate) fn from_write(err: StorageError) -> Self {
        match err {
            StorageError::UnknownMember { id } => Self::NotFound { id },
            other => Self::Storage(other),
        }
    }
}

impl From<Interrupt> for EngineError {
    fn from(interrupt: Interrupt) -> Self {
        Self::Canceled(interrupt)
    }
}

impl From<MaskError> for EngineError {
    fn from(err: MaskError) -> Self {
        match err {
            MaskError::Empty => Self::invalid("no fields included in the update mask"),
            MaskError::Fields(fields) => Self::InvalidArgument {
                message: "invalid fields in request".into(),
                fields,
            },
        }
    }
}
