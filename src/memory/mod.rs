//! Retrieval-augmented memory over archived viabilities.
//!
//! Ingestion runs chunker → embedding provider → store; queries run
//! store → similarity index → embedding provider → ranked results.

mod chunking;
mod codec;
mod embeddings;
mod error;
mod index;
mod manager;
mod schema;
mod search;
mod store;

pub use chunking::chunk_text;
pub use embeddings::{
    create_provider, embed_one, EmbeddingProvider, EmbeddingProviderBox,
    OpenAiCompatibleProvider, ProviderDefaults, RetryPolicy,
};
pub use error::{IndexError, MemoryError, ProviderError, Result, StorageError};
pub use index::{Neighbor, SimilarityIndex};
pub use manager::{MemoryService, MemorySettings};
pub use search::{
    filter_relevant, filter_relevant_default, render_context, SimilarityResult,
    NO_RELEVANT_HISTORY,
};
pub use store::{
    ChatLogEntry, ChunkRecord, NewViability, Viability, ViabilityStore, ViabilityUpdate,
};
