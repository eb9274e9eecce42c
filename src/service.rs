//! Search service: ingest lifecycle, working-set state machine, queries.
//!
//! The service starts unloaded, picks up persisted artifacts when they
//! match the active model, and swaps in a complete working set atomically
//! on every successful process run. Searches clone the current set out of
//! the lock and never observe a half-built state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use crate::chunker::{self, ChunkError};
use crate::config::Config;
use crate::document::{self, DocumentError};
use crate::embedder::{EmbeddingError, TextEmbedder};
use crate::index::{FlatIndex, IndexError};
use crate::store::{StoreError, WorkingSet, WorkingSetStore};

/// Errors that can occur during service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Source document not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("No document has been processed yet")]
    NotLoaded,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Chunking error: {0}")]
    Chunking(#[from] ChunkError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Response envelope for a process operation.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub chunks_created: usize,
    pub status: String,
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: usize,
    pub text: String,
    pub similarity: f32,
    pub similarity_percent: f32,
    pub rank: usize,
    pub word_count: usize,
}

/// Response envelope for a search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub found_results: bool,
    pub top_k_requested: usize,
    pub threshold_used: f32,
}

/// Health report for the service and its artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub pdf_exists: bool,
    pub embeddings_exist: bool,
    pub service_loaded: bool,
    pub similarity_threshold: f32,
}

/// Semantic retrieval over one document.
pub struct SearchService {
    config: Config,
    embedder: Arc<dyn TextEmbedder>,
    store: WorkingSetStore,
    working: RwLock<Option<Arc<WorkingSet>>>,
    rebuild: Mutex<()>,
}

impl SearchService {
    /// Create the service and pick up persisted artifacts if present.
    ///
    /// Missing artifacts leave the service unloaded until the first
    /// process call. Corrupt artifacts are logged and also leave it
    /// unloaded. Artifacts built by a different model or dimension abort
    /// with a configuration error instead of serving mismatched vectors.
    pub fn open(config: Config, embedder: Arc<dyn TextEmbedder>) -> Result<Self, ServiceError> {
        let store = WorkingSetStore::new(config.vectors_path(), config.chunks_path());
        let service = Self {
            config,
            embedder,
            store,
            working: RwLock::new(None),
            rebuild: Mutex::new(()),
        };
        service.load_persisted()?;
        Ok(service)
    }

    fn load_persisted(&self) -> Result<(), ServiceError> {
        if !self.store.artifacts_exist() {
            log::info!("no persisted index found, starting unloaded");
            return Ok(());
        }

        match self
            .store
            .load(&self.embedder.model_id(), self.embedder.dimensions())
        {
            Ok(set) => {
                log::info!(
                    "loaded {} chunks from {}",
                    set.len(),
                    self.store.vectors_path().display()
                );
                self.publish(set)?;
                Ok(())
            }
            Err(err @ (StoreError::ModelMismatch | StoreError::DimensionMismatch { .. })) => {
                Err(ServiceError::InvalidConfig(format!(
                    "persisted artifacts do not match model '{}': {err}",
                    self.embedder.name()
                )))
            }
            Err(err) => {
                log::error!("failed to load persisted index, starting unloaded: {err}");
                Ok(())
            }
        }
    }

    /// Ingest the configured document: extract, chunk, embed, index,
    /// persist, then swap the fresh working set in.
    ///
    /// Concurrent calls are serialized behind a build lock. On any failure
    /// a previously loaded set stays in service untouched.
    pub fn process(&self) -> Result<ProcessResponse, ServiceError> {
        let _build = self
            .rebuild
            .lock()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;

        let source = self.config.document_path();
        let text = document::load_text(&source, self.config.page_start, self.config.page_end)
            .map_err(|err| match err {
                DocumentError::NotFound(path) => ServiceError::SourceNotFound(path),
                other => ServiceError::Document(other),
            })?;

        let chunks =
            chunker::chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap)?;
        log::info!("chunked {} into {} chunks", source.display(), chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let index = FlatIndex::from_vectors(self.embedder.dimensions(), vectors)?;
        let set = WorkingSet::new(index, chunks)?;

        self.store.save(&set, &self.embedder.model_id())?;

        // the freshly built set goes live directly, no reload round-trip
        let chunks_created = self.publish(set)?;
        log::info!("indexed {chunks_created} chunks");

        Ok(ProcessResponse {
            chunks_created,
            status: "success".to_string(),
        })
    }

    /// Run a semantic query against the loaded working set.
    ///
    /// A `threshold` of `None` uses the configured similarity threshold.
    /// Ranks are assigned in candidate order before the threshold filter;
    /// an empty result set is a valid success.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<SearchResponse, ServiceError> {
        let set = self.current()?.ok_or(ServiceError::NotLoaded)?;
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);

        let query_vector = self.embedder.embed(query)?;
        let neighbors = set.index().search(&query_vector, top_k)?;

        let mut results = Vec::new();
        for (candidate, neighbor) in neighbors.iter().enumerate() {
            // unit vectors: cosine similarity from euclidean distance
            let similarity = 1.0 - (neighbor.distance * neighbor.distance) / 2.0;
            if similarity < threshold {
                continue;
            }
            // skip positions the chunk list cannot answer
            let chunk = match set.chunks().get(neighbor.position) {
                Some(chunk) => chunk,
                None => continue,
            };
            results.push(SearchResult {
                chunk_id: chunk.id,
                text: chunk.text.clone(),
                similarity,
                similarity_percent: (similarity * 10_000.0).round() / 100.0,
                rank: candidate + 1,
                word_count: chunk.word_count,
            });
        }

        let found_results = !results.is_empty();
        Ok(SearchResponse {
            query: query.to_string(),
            results,
            found_results,
            top_k_requested: top_k,
            threshold_used: threshold,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Report liveness facts about the service and its artifacts.
    pub fn health(&self) -> Health {
        Health {
            pdf_exists: self.config.document_path().exists(),
            embeddings_exist: self.store.vectors_exist(),
            service_loaded: self.current().map(|set| set.is_some()).unwrap_or(false),
            similarity_threshold: self.config.similarity_threshold,
        }
    }

    /// Clone the current working set out of the lock.
    fn current(&self) -> Result<Option<Arc<WorkingSet>>, ServiceError> {
        let guard = self
            .working
            .read()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;
        Ok(guard.clone())
    }

    fn publish(&self, set: WorkingSet) -> Result<usize, ServiceError> {
        let count = set.len();
        let mut guard = self
            .working
            .write()
            .map_err(|e| ServiceError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(Arc::new(set));
        Ok(count)
    }
}
