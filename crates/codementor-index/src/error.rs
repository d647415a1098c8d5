use codementor_llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A remote call (vector store, embedding or rerank) failed.
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("index {index} not ready after {attempts} status checks")]
    IndexProvisioningTimeout { index: String, attempts: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed for batch {batch}: {source}")]
    Embedding {
        batch: usize,
        #[source]
        source: LlmError,
    },

    #[error("upsert failed for batch {batch}: {source}")]
    Upsert {
        batch: usize,
        #[source]
        source: Box<IndexError>,
    },

    #[error("chunk file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk file is not a valid chunk array: {0}")]
    Json(#[from] serde_json::Error),

    #[error("folder cache database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("folder cache migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("vector store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Stable snake_case name of the failure class, provider taxonomy included.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) | Self::Embedding { source: e, .. } => e.kind(),
            Self::Upsert { source, .. } => source.kind(),
            Self::IndexProvisioningTimeout { .. } => "index_provisioning_timeout",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Io(_) | Self::Json(_) | Self::Sqlite(_) | Self::Migration(_) | Self::Store(_) => {
                "internal"
            }
        }
    }
}
