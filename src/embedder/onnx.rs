//! Sentence-transformer inference on ONNX Runtime.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::tokenizer::{BertTokenizer, Encoded};
use super::{Embedder, EmbedderError, l2_normalize};

/// Longest token sequence the MiniLM family was trained on.
pub const MAX_SEQUENCE_LENGTH: usize = 256;

/// `model.onnx` + `tokenizer.json` from a sentence-transformers export.
///
/// Output vectors are the attention-masked mean of the last hidden state,
/// L2-normalized. `Session::run` needs `&mut`, so calls are serialized.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    model_name: String,
    dimensions: usize,
}

fn load_failed<E: std::fmt::Display>(stage: &str) -> impl Fn(E) -> EmbedderError + '_ {
    move |e| EmbedderError::ModelLoadFailed(format!("{stage}: {e}"))
}

fn input_tensor(name: &str, values: &[i64]) -> Result<Tensor<i64>, EmbedderError> {
    Tensor::from_array(([1usize, values.len()], values.to_vec()))
        .map_err(|e| EmbedderError::InferenceFailed(format!("{name} tensor: {e}")))
}

impl OnnxEmbedder {
    pub fn new(
        model_dir: &Path,
        model_name: &str,
        dimensions: usize,
        intra_threads: usize,
    ) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.is_file() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!(
            "Loading {model_name} from {} ({} threads)",
            model_dir.display(),
            intra_threads.max(1)
        );

        let session = Session::builder()
            .map_err(load_failed("session builder"))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(load_failed("thread config"))?
            .commit_from_file(&model_path)
            .map_err(load_failed("model load"))?;
        let tokenizer = BertTokenizer::from_model_dir(model_dir, MAX_SEQUENCE_LENGTH)?;

        debug!("Tokenizer vocabulary: {} entries", tokenizer.vocab_size());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Last hidden state for one encoded text, flattened `[seq_len * dimensions]`.
    fn hidden_state(&self, enc: &Encoded) -> Result<Vec<f32>, EmbedderError> {
        let inputs = ort::inputs![
            "input_ids" => input_tensor("input_ids", &enc.input_ids)?,
            "attention_mask" => input_tensor("attention_mask", &enc.attention_mask)?,
            "token_type_ids" => input_tensor("token_type_ids", &enc.token_type_ids)?,
        ];

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedderError::InferenceFailed("session lock poisoned".to_string()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output tensor: {e}")))?;

        let expected = enc.len() * self.dimensions;
        if data.len() != expected {
            return Err(EmbedderError::InferenceFailed(format!(
                "model produced {} values for {} tokens; is it really {}-dimensional?",
                data.len(),
                enc.len(),
                self.dimensions
            )));
        }
        Ok(data.to_vec())
    }
}

impl Embedder for OnnxEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let enc = self.tokenizer.encode(text)?;
        let hidden = self.hidden_state(&enc)?;

        let mut vector = masked_mean(&hidden, &enc.attention_mask, self.dimensions);
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Average of the token rows whose mask is set. All-zero when nothing is masked in.
fn masked_mean(hidden: &[f32], mask: &[i64], dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dim];
    let mut kept = 0usize;

    for (row, _) in hidden
        .chunks_exact(dim.max(1))
        .zip(mask)
        .filter(|(_, m)| **m != 0)
    {
        for (acc, v) in sum.iter_mut().zip(row) {
            *acc += v;
        }
        kept += 1;
    }

    if kept > 0 {
        let n = kept as f32;
        sum.iter_mut().for_each(|v| *v /= n);
    }
    sum
}
