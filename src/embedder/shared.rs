//! Lazily-initialized, process-wide embedding model.
//!
//! The backend is constructed on first use and reused for the rest of the
//! process. Concurrent first calls still run the loader exactly once, and a
//! failed load is remembered: every later call gets the same
//! [`EmbedderError::ModelLoadFailed`] instead of retrying.
use std::sync::OnceLock;

use tracing::{error, info};

use super::download::{fetch_missing, missing_files, repo_for};
use super::onnx::OnnxEmbedder;
use super::{Embedder, EmbedderError};
use crate::config::ModelConfig;

type Loader = Box<dyn Fn() -> Result<Box<dyn Embedder>, EmbedderError> + Send + Sync>;

pub struct SharedEmbedder {
    model_name: String,
    dimensions: usize,
    loader: Loader,
    cell: OnceLock<Result<Box<dyn Embedder>, EmbedderError>>,
}

impl SharedEmbedder {
    /// Wrap an arbitrary loader. `model_name` and `dimensions` describe what
    /// the loader is expected to produce and are answered without loading.
    pub fn new<F>(model_name: impl Into<String>, dimensions: usize, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Embedder>, EmbedderError> + Send + Sync + 'static,
    {
        Self {
            model_name: model_name.into(),
            dimensions,
            loader: Box::new(loader),
            cell: OnceLock::new(),
        }
    }

    /// ONNX backend described by the model section of the configuration.
    ///
    /// Missing model files are downloaded first when `auto_download` is set.
    pub fn from_config(model: &ModelConfig) -> Self {
        let cfg = model.clone();
        Self::new(model.name.clone(), model.dimensions, move || {
            let dir = cfg.model_dir();
            let missing = missing_files(&dir);
            if !missing.is_empty() {
                if !cfg.auto_download {
                    return Err(EmbedderError::ModelLoadFailed(format!(
                        "{} missing in {} and auto_download is disabled",
                        missing.join(", "),
                        dir.display()
                    )));
                }
                fetch_missing(&dir, &repo_for(&cfg.name))
                    .map_err(|e| EmbedderError::ModelLoadFailed(format!("{e:#}")))?;
            }
            let embedder = OnnxEmbedder::new(&dir, &cfg.name, cfg.dimensions, cfg.intra_threads)?;
            Ok(Box::new(embedder) as Box<dyn Embedder>)
        })
    }

    /// The loaded backend, loading it on first call.
    pub fn get(&self) -> Result<&dyn Embedder, EmbedderError> {
        let loaded = self.cell.get_or_init(|| {
            info!("Loading embedding model {}", self.model_name);
            let result = (self.loader)();
            match &result {
                Ok(embedder) => {
                    if embedder.dimensions() != self.dimensions {
                        return Err(EmbedderError::ModelLoadFailed(format!(
                            "model produces {} dimensions, configured for {}",
                            embedder.dimensions(),
                            self.dimensions
                        )));
                    }
                }
                Err(e) => error!("Embedding model failed to load: {e}"),
            }
            result
        });
        loaded.as_deref().map_err(Clone::clone)
    }

    /// Whether the loader has already run (successfully or not).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Embedder for SharedEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        self.get()?.embed_one(text)
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.get()?.embed(texts)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
