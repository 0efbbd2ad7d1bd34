use thiserror::Error;

impl From<serde_json::Error> for AnchorError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AnchorError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::DuplicateBatch(db_err.message().to_string());
            }
        }
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<sqlx::migrate::MigrateError> for AnchorError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError(format!("Migration failed: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Batch already exists: {0}")]
    DuplicateBatch(String),

    #[error("Cannot build Merkle tree from empty leaves")]
    EmptyLeaves,

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Leaf not found in tree: {0}")]
    LeafNotFound(String),

    #[error("Actor is required")]
    MissingActor,

    #[error("Batch id is required")]
    MissingBatchId,

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("No audit entries in window for actor {0}")]
    EmptyWindow(String),

    #[error("Stored root {stored} does not match rebuilt root {rebuilt}")]
    RootMismatch { stored: String, rebuilt: String },

    #[error("Chain client is not configured")]
    ChainUnavailable,

    #[error("Chain error: {0}")]
    ChainError(String),

    #[error("Root {0} is not confirmed on chain")]
    RootNotConfirmed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AnchorError {
    /// Rejected before any side effect took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyLeaves
                | Self::InvalidHash(_)
                | Self::LeafNotFound(_)
                | Self::MissingActor
                | Self::MissingBatchId
                | Self::InvalidTimestamp(_)
                | Self::EmptyWindow(_)
        )
    }

    /// Raised by, or on behalf of, the external anchoring ledger.
    pub fn is_chain(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable | Self::ChainError(_) | Self::RootNotConfirmed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;
