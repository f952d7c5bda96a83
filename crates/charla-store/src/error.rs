use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("encryption error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown model: {0}")]
    UnknownModel(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
