use thiserror::Error;

#[derive(Error, Debug)]
pub enum TourDbError {
    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid collection name: '{0}'")]
    InvalidCollectionName(String),

    #[error("Corrupt record {collection}/{id}: {detail}")]
    CorruptRecord {
        collection: String,
        id: String,
        detail: String,
    },

    #[error("Duplicate id: {collection}/{id}")]
    DuplicateId { collection: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TourDbError {
    /// True for errors caused by the caller's input rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TourDbError::InvalidDescriptor(_)
                | TourDbError::InvalidCollectionName(_)
                | TourDbError::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TourDbError>;
