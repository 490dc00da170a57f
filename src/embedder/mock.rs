//! Model-free embedder: every text maps to a fixed pseudo-random unit vector.
//!
//! Identical texts get identical vectors, so an exact-text query scores 1.0
//! against its own chunk. Nothing else about the geometry is meaningful.
//! The seed is FNV-1a over the UTF-8 bytes, so vectors persisted in a
//! `--mock` index stay valid across toolchains.

use super::{Embedder, EmbedderError, l2_normalize};

/// Recorded as the model name of indexes built with `--mock`.
pub const MOCK_MODEL_NAME: &str = "mock-hash";

const DEFAULT_DIMENSIONS: usize = 384;

#[derive(Debug, Clone, Copy)]
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

/// 64-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// One splitmix64 step.
fn next_u64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl Embedder for MockEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut state = fnv1a(text.as_bytes());

        // top 24 bits -> [-1, 1)
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| (next_u64(&mut state) >> 40) as f32 / (1u64 << 23) as f32 - 1.0)
            .collect();
        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL_NAME
    }
}
