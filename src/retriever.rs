//! Brute-force top-k retrieval over a loaded index.
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use tracing::debug;

use crate::embedder::{Embedder, EmbedderError};
use crate::store::{self, Chunk, EmbeddingMatrix, Index, StoreError};

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedderError),

    #[error("query vector has {query} dimensions but the index has {index}")]
    DimensionMismatch { query: usize, index: usize },

    #[error("index has {chunks} chunks but {rows} embedding rows")]
    MisalignedIndex { chunks: usize, rows: usize },
}

/// One ranked result. The chunk is an owned copy of the cached record.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

impl SearchHit {
    /// `"{source}, {location}"`, for citing the hit in a prompt.
    #[must_use]
    pub fn citation(&self) -> String {
        format!("{}, {}", self.chunk.source_name, self.chunk.location)
    }
}

/// Read-only handle to an index, loaded from disk at most once.
pub struct IndexHandle {
    path: Option<PathBuf>,
    expected_model: Option<String>,
    cell: OnceLock<Index>,
    init: Mutex<()>,
}

impl IndexHandle {
    /// Load lazily from `path` on first use.
    ///
    /// With `expected_model` set, a model mismatch is logged when the index loads.
    pub fn from_path(path: impl Into<PathBuf>, expected_model: Option<&str>) -> Self {
        Self {
            path: Some(path.into()),
            expected_model: expected_model.map(str::to_string),
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// A handle over an index that is already in memory.
    pub fn from_index(index: Index) -> Self {
        Self {
            path: None,
            expected_model: None,
            cell: OnceLock::from(index),
            init: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The cached index, loading it first if needed.
    ///
    /// A failed load is not cached, so a later call can succeed once the index
    /// has been built.
    pub fn get(&self) -> Result<&Index, StoreError> {
        if let Some(index) = self.cell.get() {
            return Ok(index);
        }

        // Serializes first-time loads; the loser of a race finds the cell filled.
        let _guard = self.init.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(index) = self.cell.get() {
            return Ok(index);
        }

        let path = self
            .path
            .as_deref()
            .ok_or_else(|| StoreError::IndexNotFound(PathBuf::new()))?;
        let index = match &self.expected_model {
            Some(model) => store::load_checked(path, model)?,
            None => store::load(path)?,
        };
        Ok(self.cell.get_or_init(|| index))
    }
}

/// Cosine similarity of `query` against every row, clamped to `[-1, 1]`.
///
/// Zero-norm rows (or a zero query) score 0; non-finite results score -1.
pub fn cosine_scores(matrix: &EmbeddingMatrix, query: &[f32]) -> Vec<f32> {
    let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();

    matrix
        .iter_rows()
        .map(|row| {
            let mut dot = 0.0f32;
            let mut row_sq = 0.0f32;
            for (a, b) in row.iter().zip(query) {
                dot += a * b;
                row_sq += a * a;
            }
            let denom = row_sq.sqrt() * query_norm;
            if denom == 0.0 {
                return 0.0;
            }
            let score = dot / denom;
            if score.is_finite() {
                score.clamp(-1.0, 1.0)
            } else {
                -1.0
            }
        })
        .collect()
}

/// Chunk `i` must own embedding row `i`; injected indexes skip the load-time check.
fn check_aligned(index: &Index) -> Result<(), RetrieveError> {
    let rows = index.embeddings.rows();
    if index.chunks.len() != rows {
        return Err(RetrieveError::MisalignedIndex {
            chunks: index.chunks.len(),
            rows,
        });
    }
    Ok(())
}

/// Rank every chunk of `index` against a query vector.
///
/// `top_k` is clamped to the number of chunks. Equal scores keep index order,
/// so the lower row wins a tie.
pub fn rank(index: &Index, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, RetrieveError> {
    if top_k == 0 {
        return Ok(Vec::new());
    }
    check_aligned(index)?;
    let n = index.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if query.len() != index.embeddings.dim() {
        return Err(RetrieveError::DimensionMismatch {
            query: query.len(),
            index: index.embeddings.dim(),
        });
    }

    let scores = cosine_scores(&index.embeddings, query);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(top_k.min(n));

    Ok(order
        .into_iter()
        .map(|i| SearchHit {
            chunk: index.chunks[i].clone(),
            score: scores[i],
        })
        .collect())
}

/// Query-time entry point: embeds the query with the same model used at build time.
pub struct Retriever<'a, E: Embedder + ?Sized> {
    embedder: &'a E,
    index: IndexHandle,
}

impl<'a, E: Embedder + ?Sized> Retriever<'a, E> {
    pub fn new(embedder: &'a E, index: IndexHandle) -> Self {
        Self { embedder, index }
    }

    /// Retriever over the index at `path`, checked against the embedder's model name.
    pub fn open(embedder: &'a E, path: impl Into<PathBuf>) -> Self {
        let handle = IndexHandle::from_path(path, Some(embedder.model_name()));
        Self::new(embedder, handle)
    }

    #[must_use]
    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    /// The `top_k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrieveError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let index = self.index.get()?;
        check_aligned(index)?;
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query)?;
        let hits = rank(index, &query_vec, top_k)?;
        debug!(
            "Query matched {} of {} chunks (best score {:?})",
            hits.len(),
            index.len(),
            hits.first().map(|h| h.score)
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::store::{FORMAT_VERSION, IndexMeta, Location};

    /// Embeds every text to the same vector.
    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
            Ok(self.0.clone())
        }

        fn dimensions(&self) -> usize {
            self.0.len()
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn index_from(rows: &[Vec<f32>]) -> Index {
        let dim = rows.first().map(Vec::len).unwrap_or(3);
        Index {
            meta: IndexMeta {
                model_name: "fixed".to_string(),
                dimensions: dim,
                source: "test".to_string(),
                chunk_policy: "per-section".to_string(),
                built_at: "2026-01-01T00:00:00+00:00".to_string(),
                format_version: FORMAT_VERSION,
            },
            chunks: (0..rows.len())
                .map(|i| Chunk {
                    id: format!("doc#sec{}", i + 1),
                    source_name: "doc".to_string(),
                    location: Location::Section {
                        ordinal: i as u32 + 1,
                    },
                    text: format!("chunk {i}"),
                })
                .collect(),
            embeddings: EmbeddingMatrix::from_rows(dim, rows).unwrap(),
        }
    }

    fn basis() -> Index {
        index_from(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
    }

    #[test]
    fn test_basis_vectors_top_hit() {
        let embedder = FixedEmbedder(vec![0.0, 1.0, 0.0]);
        let retriever = Retriever::new(&embedder, IndexHandle::from_index(basis()));

        let hits = retriever.search("anything", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "doc#sec2");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let hits = retriever.search("anything", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "doc#sec2");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_top_k_clamped() {
        let embedder = FixedEmbedder(vec![0.0, 1.0, 0.0]);
        let retriever = Retriever::new(&embedder, IndexHandle::from_index(basis()));

        assert_eq!(retriever.search("q", 10).unwrap().len(), 3);
        assert!(retriever.search("q", 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let embedder = FixedEmbedder(vec![0.0, 1.0, 0.0]);
        let retriever = Retriever::new(&embedder, IndexHandle::from_index(index_from(&[])));

        assert!(retriever.search("q", 3).unwrap().is_empty());
    }

    #[test]
    fn test_ties_prefer_lower_row() {
        let index = index_from(&[
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![2.0, 0.0],
        ]);
        let hits = rank(&index, &[1.0, 0.0], 4).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["doc#sec2", "doc#sec3", "doc#sec4", "doc#sec1"]);
    }

    #[test]
    fn test_scores_descending_and_bounded() {
        let index = index_from(&[
            vec![1.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.5, 0.1],
            vec![0.0, 0.0],
        ]);
        let hits = rank(&index, &[1.0, 0.2], 10).unwrap();

        assert_eq!(hits.len(), 4);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for hit in &hits {
            assert!((-1.0..=1.0).contains(&hit.score));
        }
        assert_eq!(hits.last().unwrap().chunk.id, "doc#sec2");
        assert!((hits.last().unwrap().score + 0.98).abs() < 0.01);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let matrix = EmbeddingMatrix::from_rows(2, &[vec![3.0, 4.0], vec![0.0, 0.0]]).unwrap();
        let scores = cosine_scores(&matrix, &[6.0, 8.0]);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert_eq!(scores[1], 0.0);
    }

    fn with_missing_row(mut index: Index) -> Index {
        let dim = index.embeddings.dim();
        let rows: Vec<Vec<f32>> = index
            .embeddings
            .iter_rows()
            .take(index.embeddings.rows() - 1)
            .map(<[f32]>::to_vec)
            .collect();
        index.embeddings = EmbeddingMatrix::from_rows(dim, &rows).unwrap();
        index
    }

    #[test]
    fn test_injected_index_with_missing_row_is_rejected() {
        let five = index_from(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![0.0, 1.0, 1.0],
        ]);
        let index = with_missing_row(five);
        assert_eq!((index.chunks.len(), index.embeddings.rows()), (5, 4));

        let embedder = MockEmbedder::new(3);
        let retriever = Retriever::new(&embedder, IndexHandle::from_index(index));
        assert!(matches!(
            retriever.search("q", 3),
            Err(RetrieveError::MisalignedIndex { chunks: 5, rows: 4 })
        ));
    }

    #[test]
    fn test_zero_width_matrix_with_chunks_is_rejected() {
        let mut index = basis();
        index.embeddings = EmbeddingMatrix::empty(0);

        assert!(matches!(
            rank(&index, &[], 2),
            Err(RetrieveError::MisalignedIndex { chunks: 3, rows: 0 })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = rank(&basis(), &[1.0, 0.0], 2).unwrap_err();
        assert!(matches!(
            err,
            RetrieveError::DimensionMismatch { query: 2, index: 3 }
        ));
    }

    #[test]
    fn test_hits_are_copies() {
        let embedder = FixedEmbedder(vec![1.0, 0.0, 0.0]);
        let retriever = Retriever::new(&embedder, IndexHandle::from_index(basis()));

        let mut hits = retriever.search("q", 1).unwrap();
        hits[0].chunk.text.push_str(" (edited)");

        let again = retriever.search("q", 1).unwrap();
        assert_eq!(again[0].chunk.text, "chunk 0");
    }

    #[test]
    fn test_citation() {
        let hit = SearchHit {
            chunk: Chunk {
                id: "book.pdf#p12.2".to_string(),
                source_name: "book.pdf".to_string(),
                location: Location::Page { page: 12, part: 2 },
                text: "text".to_string(),
            },
            score: 0.5,
        };
        assert_eq!(hit.citation(), "book.pdf, page 12, part 2");
    }

    #[test]
    fn test_missing_index_is_index_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = MockEmbedder::new(8);
        let retriever = Retriever::open(&embedder, dir.path().join("index.db"));

        let err = retriever.search("q", 3).unwrap_err();
        assert!(matches!(
            err,
            RetrieveError::Store(StoreError::IndexNotFound(_))
        ));
        assert!(!retriever.index().is_loaded());
    }

    #[test]
    fn test_lazy_load_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        store::save(&basis(), &path).unwrap();

        let embedder = FixedEmbedder(vec![0.0, 0.0, 1.0]);
        let retriever = Retriever::open(&embedder, &path);
        assert!(!retriever.index().is_loaded());

        let first = retriever.search("q", 1).unwrap();
        assert!(retriever.index().is_loaded());

        // Cached: the file is no longer consulted
        std::fs::remove_file(&path).unwrap();
        let second = retriever.search("q", 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(second[0].chunk.id, "doc#sec3");
    }

    #[test]
    fn test_concurrent_first_access_shares_one_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        store::save(&basis(), &path).unwrap();
        let handle = IndexHandle::from_path(&path, None);

        let addrs: Vec<usize> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| handle.get().unwrap() as *const Index as usize))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }
}
