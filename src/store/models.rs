use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a chunk sits inside its source document.
///
/// Ordering follows document order, so locations strictly increase within
/// one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// 1-based PDF page and 1-based part within that page.
    Page { page: u32, part: u32 },
    /// 1-based section ordinal in a text document.
    Section { ordinal: u32 },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Page { page, part: 1 } => write!(f, "page {page}"),
            Location::Page { page, part } => write!(f, "page {page}, part {part}"),
            Location::Section { ordinal } => write!(f, "section {ordinal}"),
        }
    }
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_name: String,
    pub location: Location,
    pub text: String,
}

/// Dense row-major `f32` matrix, one row per chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// An empty matrix with a fixed row width.
    #[must_use]
    pub fn empty(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build a matrix from rows. Returns `None` when rows have different lengths.
    pub fn from_rows(dim: usize, rows: &[Vec<f32>]) -> Option<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return None;
            }
            data.extend_from_slice(row);
        }
        Some(Self { dim, data })
    }

    /// Append one row. Returns `false` (and leaves the matrix untouched) on a width mismatch.
    pub fn push_row(&mut self, row: &[f32]) -> bool {
        if row.len() != self.dim {
            return false;
        }
        self.data.extend_from_slice(row);
        true
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `i`, or `None` past the end.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero width
        self.data.chunks_exact(self.dim.max(1))
    }
}

/// Provenance recorded alongside every persisted index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub model_name: String,
    pub dimensions: usize,
    pub source: String,
    pub chunk_policy: String,
    pub built_at: String,
    pub format_version: u32,
}

/// Chunks, their embeddings and provenance, always handled as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub meta: IndexMeta,
    pub chunks: Vec<Chunk>,
    pub embeddings: EmbeddingMatrix,
}

impl Index {
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
