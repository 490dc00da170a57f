//! `tokenizer.json` loader for the MiniLM family.
use std::path::Path;

use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::EmbedderError;

/// Model inputs for one text, all of the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    /// Tokens dropped beyond the sequence limit.
    pub truncated: bool,
}

impl Encoded {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

pub struct BertTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

impl BertTokenizer {
    /// Texts are encoded one at a time, so padding is disabled and only
    /// truncation to `max_length` applies.
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self, EmbedderError> {
        let path = model_dir.join("tokenizer.json");
        if !path.is_file() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "tokenizer.json not found in {}",
                model_dir.display()
            )));
        }

        let mut inner = Tokenizer::from_file(&path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("{}: {e}", path.display())))?;
        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| EmbedderError::TokenizerError(format!("truncation setup: {e}")))?;
        inner.with_padding(None);

        Ok(Self { inner, max_length })
    }

    pub fn encode(&self, text: &str) -> Result<Encoded, EmbedderError> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| EmbedderError::TokenizerError(e.to_string()))?;

        let widen = |xs: &[u32]| xs.iter().map(|&x| i64::from(x)).collect::<Vec<_>>();
        let truncated = !encoding.get_overflowing().is_empty();
        if truncated {
            debug!(
                "Text of {} chars truncated to {} tokens",
                text.chars().count(),
                self.max_length
            );
        }

        Ok(Encoded {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
            token_type_ids: widen(encoding.get_type_ids()),
            truncated,
        })
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}
