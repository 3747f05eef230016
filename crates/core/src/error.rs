use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("entropy source failure: {0}")]
    Entropy(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("authentication of sealed data failed")]
    Authentication,

    #[error("invalid data: {0}")]
    InvalidData(String),
}
