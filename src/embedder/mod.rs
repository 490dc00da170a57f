/// Embedder trait and shared types for text embedding.
///
/// Every backend maps text to fixed-width vectors; chunks and queries go
/// through the same trait so their vectors are comparable.
pub mod download;
pub mod mock;
pub mod onnx;
pub mod shared;
pub mod tokenizer;

use thiserror::Error;

pub use shared::SharedEmbedder;

/// Errors that can occur during embedding operations.
///
/// `Clone` so a failed one-time model load can be handed to every later caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple texts. Output row `i` belongs to `texts[i]` and equals
    /// `embed_one(texts[i])`.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Identifier recorded in built indexes.
    fn model_name(&self) -> &str;
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    for v in vec.iter_mut() {
        *v *= inv_norm;
    }
}
