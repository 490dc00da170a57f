//! `config.json`: where the corpus and index live, how to chunk, which model to load.
//!
//! Every field is optional in the file; anything missing takes its default.
//! CLI flags are applied on top by `main`.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indexer::chunker::{ChunkMode, ChunkPolicy};
use crate::indexer::corpus::Corpus;

/// Config file looked up when `--config` is not given. Only this name gets a
/// template written when missing.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_MAX_CHARS: usize = 400;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_DIMENSIONS: usize = 384;

fn default_corpus_path() -> String {
    "./data/policies".to_string()
}

fn default_index_path() -> String {
    "./data/index/index.db".to_string()
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_auto_download() -> bool {
    true
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// PDF file or directory of `.txt`/`.md` files.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default = "default_top_k")]
    pub search_top_k: usize,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// `size_bounded` or `per_section`; unset picks by corpus kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChunkMode>,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Defaults to `models/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default = "default_auto_download")]
    pub auto_download: bool,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            index_path: default_index_path(),
            chunking: ChunkingConfig::default(),
            search_top_k: default_top_k(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: None,
            max_chars: default_max_chars(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            dir: None,
            auto_download: default_auto_download(),
            intra_threads: default_intra_threads(),
        }
    }
}

impl ModelConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return PathBuf::from(dir);
        }
        // "org/name" -> models/name
        let short = self.name.rsplit('/').next().unwrap_or(&self.name);
        Path::new("models").join(short)
    }
}

impl Config {
    /// Read `path`, falling back to defaults when it is missing or not valid JSON.
    ///
    /// A missing [`DEFAULT_CONFIG_FILE`] is written out as a template.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            let cfg = Self::default();
            if path == Path::new(DEFAULT_CONFIG_FILE) {
                match cfg.save(path) {
                    Ok(()) => info!("Wrote config template to {}", path.display()),
                    Err(e) => warn!("Could not write config template: {e:#}"),
                }
            }
            return Ok(cfg);
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        match serde_json::from_str(&data) {
            Ok(cfg) => {
                info!("Loaded configuration from {}", path.display());
                Ok(cfg)
            }
            Err(e) => {
                warn!("Ignoring invalid {} ({e}); using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to encode config")?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.corpus_path.trim().is_empty(), "corpus_path is empty");
        anyhow::ensure!(!self.index_path.trim().is_empty(), "index_path is empty");
        anyhow::ensure!(self.chunking.max_chars > 0, "chunking.max_chars must be at least 1");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be at least 1");
        anyhow::ensure!(!self.model.name.trim().is_empty(), "model.name is empty");
        anyhow::ensure!(self.model.dimensions > 0, "model.dimensions must be at least 1");
        Ok(())
    }

    pub fn corpus(&self) -> Result<Corpus> {
        Corpus::from_path(Path::new(&self.corpus_path))
            .with_context(|| format!("invalid corpus_path {}", self.corpus_path))
    }

    /// An explicit `chunking.mode` wins over the corpus default.
    #[must_use]
    pub fn chunk_policy(&self, corpus: &Corpus) -> ChunkPolicy {
        match self.chunking.mode.unwrap_or_else(|| corpus.default_mode()) {
            ChunkMode::SizeBounded => ChunkPolicy::size_bounded(self.chunking.max_chars),
            ChunkMode::PerSection => ChunkPolicy::per_section(),
        }
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        PathBuf::from(&self.index_path)
    }
}
