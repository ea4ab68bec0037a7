use thiserror::Error;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Failure while obtaining an embedding from the remote provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (DNS, connection reset, TLS, body decode).
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status code.
    #[error("embedding provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No answer arrived within the configured per-call timeout.
    #[error("embedding request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// The response parsed but does not match the request.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Failure of the durable record store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted vector blob cannot be decoded.
    #[error("embedding blob for chunk {chunk_id} is {len} bytes, not a whole number of f32 values")]
    CorruptVector { chunk_id: i64, len: usize },
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Failure to build or query the in-memory similarity index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("similarity index has no vectors")]
    Empty,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

// ---------------------------------------------------------------------------
// Umbrella
// ---------------------------------------------------------------------------

/// Errors surfaced by [`MemoryService`](super::MemoryService) operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A chunk was written against a viability that does not exist. This is
    /// an orchestration bug, not a recoverable runtime condition.
    #[error("viability {viability_id} does not exist; refusing to attach chunk")]
    Referential { viability_id: i64 },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("viability {viability_id} not found")]
    NotFound { viability_id: i64 },
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}

impl From<r2d2::Error> for MemoryError {
    fn from(e: r2d2::Error) -> Self {
        Self::Storage(StorageError::Pool(e))
    }
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;
