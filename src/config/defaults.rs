/// Default configuration constants used across the system.

/// Default database file name inside the state directory.
pub const DEFAULT_DB_FILE: &str = "viabilities.db";

/// Default maximum chunk length, in characters.
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1500;

/// Default number of similar chunks returned by a search.
pub const DEFAULT_TOP_K: usize = 3;

/// Distance below which a search hit counts as relevant.
pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 1.0;

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for the default model.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Default per-call embedding timeout (30 seconds).
pub const EMBEDDING_TIMEOUT_MS: u64 = 30_000;

/// Default embedding retry max attempts.
pub const EMBEDDING_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff.
pub const EMBEDDING_RETRY_INITIAL_MS: u64 = 500;

/// Default retry backoff ceiling.
pub const EMBEDDING_RETRY_MAX_MS: u64 = 8_000;
