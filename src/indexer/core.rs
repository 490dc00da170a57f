use crate::embedder::{Embedder, EmbedderError};
use crate::indexer::chunker::ChunkPolicy;
use crate::indexer::corpus::{Corpus, IngestError, SourceDocument};
use crate::store::{self, Chunk, EmbeddingMatrix, FORMAT_VERSION, Index, IndexMeta, StoreError};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Texts handed to the embedder per call.
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Embed(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("embedder returned {got} vectors for {expected} texts")]
    EmbeddingCountMismatch { expected: usize, got: usize },

    #[error("embedder returned a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("duplicate chunk id: {0}")]
    DuplicateChunkId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub model_name: String,
}

/// Offline build step: corpus → chunks → embeddings → persisted index.
pub struct Indexer<'a, E: Embedder + ?Sized> {
    pub embedder: &'a E,
    pub policy: ChunkPolicy,
}

impl<'a, E: Embedder + ?Sized> Indexer<'a, E> {
    pub fn new(embedder: &'a E, policy: ChunkPolicy) -> Self {
        Self { embedder, policy }
    }

    /// Chunk every document in order, rejecting duplicate ids.
    pub fn chunk_documents(&self, docs: &[SourceDocument]) -> Result<Vec<Chunk>, BuildError> {
        let mut chunks = Vec::new();
        let mut seen = HashSet::new();

        for doc in docs {
            let doc_chunks = doc.chunk(&self.policy);
            if doc_chunks.is_empty() {
                warn!("{} produced no chunks", doc.source_name);
            }
            for chunk in doc_chunks {
                if !seen.insert(chunk.id.clone()) {
                    return Err(BuildError::DuplicateChunkId(chunk.id));
                }
                chunks.push(chunk);
            }
        }

        Ok(chunks)
    }

    /// Embed chunk texts in batches, keeping row `i` aligned with `chunks[i]`.
    pub fn embed_chunks(&self, chunks: &[Chunk]) -> Result<EmbeddingMatrix, BuildError> {
        let dim = self.embedder.dimensions();
        let mut matrix = EmbeddingMatrix::empty(dim);

        let pb = ProgressBar::new(chunks.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("  {bar:40.cyan/blue} {pos}/{len} chunks")
        {
            pb.set_style(style);
        }

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let vectors = self.embedder.embed(&texts)?;

            if vectors.len() != texts.len() {
                return Err(BuildError::EmbeddingCountMismatch {
                    expected: texts.len(),
                    got: vectors.len(),
                });
            }
            for vector in &vectors {
                if !matrix.push_row(vector) {
                    return Err(BuildError::DimensionMismatch {
                        expected: dim,
                        got: vector.len(),
                    });
                }
            }
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();

        Ok(matrix)
    }

    /// Build an in-memory index from already-loaded documents.
    pub fn build_from_documents(
        &self,
        docs: &[SourceDocument],
        source: &str,
    ) -> Result<Index, BuildError> {
        let chunks = self.chunk_documents(docs)?;
        info!(
            "Created {} chunks from {} documents ({})",
            chunks.len(),
            docs.len(),
            self.policy
        );

        let embeddings = self.embed_chunks(&chunks)?;

        Ok(Index {
            meta: IndexMeta {
                model_name: self.embedder.model_name().to_string(),
                dimensions: self.embedder.dimensions(),
                source: source.to_string(),
                chunk_policy: self.policy.to_string(),
                built_at: Utc::now().to_rfc3339(),
                format_version: FORMAT_VERSION,
            },
            chunks,
            embeddings,
        })
    }

    /// Read `corpus`, build its index and write it to `dest`.
    pub fn build(&self, corpus: &Corpus, dest: &Path) -> Result<BuildReport, BuildError> {
        info!("Building index from {}", corpus.path().display());
        let docs = corpus.load()?;
        let index = self.build_from_documents(&docs, &corpus.describe())?;

        if index.is_empty() {
            warn!("Corpus produced no chunks; saving an empty index");
        }
        store::save(&index, dest)?;

        Ok(BuildReport {
            documents: docs.len(),
            chunks: index.len(),
            dimensions: index.embeddings.dim(),
            model_name: index.meta.model_name,
        })
    }
}
