//! # cardrag: indexing and retrieval core for a teaching RAG demo
//!
//! Splits a document corpus (a PDF book or a folder of policy files) into
//! chunks, embeds them with a local sentence-transformer, persists the index,
//! and ranks chunks against a free-text query by cosine similarity. Prompt
//! building and the LLM call live outside this crate and consume
//! [`retriever::SearchHit`]s.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration loading and validation
//! - **[`indexer`]**: corpus loading, blank-line chunking, the offline build step
//! - **[`embedder`]**: embedding trait, ONNX Runtime backend (all-MiniLM-L6-v2),
//!   lazily-initialized shared model, mock backend
//! - **[`store`]**: single-file SQLite index: chunks, embedding matrix, provenance
//! - **[`retriever`]**: lazily-loaded index handle and brute-force top-k search

pub mod config;
pub mod embedder;
pub mod indexer;
pub mod retriever;
pub mod store;

pub use embedder::{Embedder, EmbedderError, SharedEmbedder};
pub use indexer::chunker::{ChunkMode, ChunkPolicy};
pub use indexer::core::{BuildError, BuildReport, Indexer};
pub use indexer::corpus::{Corpus, IngestError};
pub use retriever::{IndexHandle, RetrieveError, Retriever, SearchHit};
pub use store::{Chunk, EmbeddingMatrix, Index, IndexMeta, Location, StoreError};
