use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_CHUNK_MAX_CHARS};

use super::chunking::chunk_text;
use super::embeddings::{create_provider, embed_one, EmbeddingProvider, RetryPolicy};
use super::error::{IndexError, Result};
use super::index::SimilarityIndex;
use super::search::SimilarityResult;
use super::store::{NewViability, Viability, ViabilityStore, ViabilityUpdate};

// ---------------------------------------------------------------------------
// MemorySettings
// ---------------------------------------------------------------------------

/// Tunables for ingestion and embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySettings {
    /// Maximum chunk length in characters.
    pub chunk_max_chars: usize,
    /// Timeout and retry budget for each embedding call.
    pub retry: RetryPolicy,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            retry: RetryPolicy::default(),
        }
    }
}

impl MemorySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_max_chars: config.memory.chunk_max_chars,
            retry: RetryPolicy::from_config(&config.embeddings),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryService
// ---------------------------------------------------------------------------

/// Owns the record store, embedding provider and settings for the
/// retrieval-augmented memory.
///
/// Build one at startup with [`MemoryService::open`] (or [`MemoryService::new`]
/// when wiring components by hand) and pass it by reference to whatever needs
/// it. The instance is cheaply cloneable: the store is a connection pool and
/// the provider sits behind an `Arc`.
#[derive(Clone)]
pub struct MemoryService {
    store: ViabilityStore,
    provider: Arc<dyn EmbeddingProvider>,
    settings: MemorySettings,
}

impl MemoryService {
    pub fn new(
        store: ViabilityStore,
        provider: Arc<dyn EmbeddingProvider>,
        settings: MemorySettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Open the store and embedding provider described by `config`.
    ///
    /// Fails when no API key is configured or the database cannot be opened.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let provider = create_provider(&config.embeddings).context(
            "no embedding API key configured; set OPENAI_API_KEY or embeddings.apiKey",
        )?;

        let db_path = config.db_path();
        let store = ViabilityStore::open(&db_path)
            .with_context(|| format!("failed to open memory db at {}", db_path.display()))?;

        info!(
            db = %db_path.display(),
            model = %provider.model_name(),
            dimensions = provider.dimensions(),
            "memory service ready"
        );

        Ok(Self::new(
            store,
            Arc::from(provider),
            MemorySettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &ViabilityStore {
        &self.store
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Archive a document: chunk `full_text`, embed every chunk, persist.
    ///
    /// All chunks are embedded before anything is written, and the viability
    /// row and its chunk rows are committed in one transaction. A failed
    /// embedding call therefore leaves no trace in the store. Empty text is
    /// accepted and produces a viability with zero chunks.
    ///
    /// A provider whose dimension differs from the vectors already stored is
    /// rejected up front, before any embedding call.
    pub async fn ingest(&self, new: &NewViability, full_text: &str) -> Result<i64> {
        let chunks = chunk_text(full_text, self.settings.chunk_max_chars);
        debug!(title = %new.title, chunks = chunks.len(), "ingesting viability");

        if !chunks.is_empty() {
            self.ensure_provider_matches_store()?;
        }

        let mut embedded = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.into_iter().enumerate() {
            let vector = embed_one(self.provider.as_ref(), &chunk, &self.settings.retry)
                .await
                .map_err(|e| {
                    warn!(title = %new.title, chunk = position, "ingestion aborted: {e}");
                    e
                })?;
            embedded.push((chunk, vector));
        }

        let id = self.store.insert_viability_with_chunks(new, &embedded)?;
        info!(
            viability_id = id,
            chunks = embedded.len(),
            title = %new.title,
            "viability ingested"
        );
        Ok(id)
    }

    fn ensure_provider_matches_store(&self) -> Result<()> {
        let actual = self.provider.dimensions();
        match self.store.stored_dimensions()? {
            Some(expected) if expected != actual => {
                warn!(
                    expected,
                    actual,
                    model = %self.provider.model_name(),
                    "embedding dimension differs from stored vectors"
                );
                Err(IndexError::DimensionMismatch { expected, actual }.into())
            }
            _ => Ok(()),
        }
    }

    /// Return the `k` stored chunks nearest to `query`, closest first.
    ///
    /// The index is rebuilt from the store on every call. An empty store (or
    /// `k == 0`) yields an empty result without contacting the provider.
    pub async fn find_similar(&self, query: &str, k: usize) -> Result<Vec<SimilarityResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let records = self.store.list_all_chunks_with_vectors()?;
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.embedding.as_slice()).collect();

        let index = match SimilarityIndex::build(&vectors) {
            Ok(index) => index,
            Err(IndexError::Empty) => {
                debug!("no stored chunks; nothing to search");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let query_vector = embed_one(self.provider.as_ref(), query, &self.settings.retry).await?;
        let hits = index.search(&query_vector, k)?;

        debug!(indexed = index.len(), returned = hits.len(), "similarity search complete");

        Ok(hits
            .into_iter()
            .map(|hit| {
                let record = &records[hit.position];
                SimilarityResult {
                    viability_id: record.viability_id,
                    chunk_text: record.text.clone(),
                    distance: hit.distance,
                }
            })
            .collect())
    }

    pub fn get_viability(&self, id: i64) -> Result<Viability> {
        self.store.get_viability(id)
    }

    pub fn list_viabilities(&self) -> Result<Vec<Viability>> {
        self.store.list_viabilities()
    }

    /// Record the outcome of the external analysis step.
    pub fn update_viability(&self, id: i64, update: &ViabilityUpdate) -> Result<()> {
        self.store.update_viability(id, update)
    }

    pub fn delete_viability(&self, id: i64) -> Result<()> {
        self.store.delete_viability(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
