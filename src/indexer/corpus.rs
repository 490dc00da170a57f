//! Build inputs: a PDF book or a directory of plain-text documents.
use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::chunker::{self, ChunkMode, ChunkPolicy};
use crate::store::Chunk;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("failed to read PDF {path}: {reason}")]
    Pdf { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corpus {
    /// One PDF file; each page with extractable text is chunked separately.
    Pdf(PathBuf),
    /// Every `.txt`/`.md` file under a directory is one source document.
    Directory(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContent {
    Text(String),
    /// `(1-based page number, page text)` in page order.
    Pages(Vec<(u32, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub source_name: String,
    pub content: SourceContent,
}

impl SourceDocument {
    pub fn chunk(&self, policy: &ChunkPolicy) -> Vec<Chunk> {
        match &self.content {
            SourceContent::Text(text) => chunker::chunk(&self.source_name, text, policy),
            SourceContent::Pages(pages) => chunker::chunk_pages(&self.source_name, pages, policy),
        }
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

impl Corpus {
    /// `Pdf` for a `.pdf` file, `Directory` for a directory.
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        if path.is_dir() {
            return Ok(Corpus::Directory(path.to_path_buf()));
        }
        if !path.exists() {
            return Err(IngestError::SourceNotFound(path.display().to_string()));
        }
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf {
            Ok(Corpus::Pdf(path.to_path_buf()))
        } else {
            Err(IngestError::SourceNotFound(format!(
                "{} is neither a PDF file nor a directory",
                path.display()
            )))
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Corpus::Pdf(p) | Corpus::Directory(p) => p,
        }
    }

    /// Books are merged into size-bounded cards; policy folders keep one chunk per section.
    #[must_use]
    pub fn default_mode(&self) -> ChunkMode {
        match self {
            Corpus::Pdf(_) => ChunkMode::SizeBounded,
            Corpus::Directory(_) => ChunkMode::PerSection,
        }
    }

    /// Identifier recorded as the index's source.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Corpus::Pdf(p) => format!("pdf:{}", p.display()),
            Corpus::Directory(p) => format!("dir:{}", p.display()),
        }
    }

    /// Read every source document, in a stable order.
    pub fn load(&self) -> Result<Vec<SourceDocument>, IngestError> {
        let docs = match self {
            Corpus::Pdf(path) => vec![load_pdf(path)?],
            Corpus::Directory(dir) => load_directory(dir)?,
        };
        if docs.is_empty() {
            return Err(IngestError::SourceNotFound(format!(
                "{} contains no readable documents",
                self.path().display()
            )));
        }
        Ok(docs)
    }
}

fn load_pdf(path: &Path) -> Result<SourceDocument, IngestError> {
    if !path.is_file() {
        return Err(IngestError::SourceNotFound(path.display().to_string()));
    }

    let doc = lopdf::Document::load(path).map_err(|e| IngestError::Pdf {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut pages = Vec::new();
    for page_num in doc.get_pages().keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push((*page_num, text.to_string()));
                }
            }
            Err(e) => warn!("Skipping page {page_num} of {}: {e}", path.display()),
        }
    }

    info!("Read {} pages with text from {}", pages.len(), path.display());
    if pages.is_empty() {
        return Err(IngestError::SourceNotFound(format!(
            "{} has no extractable text",
            path.display()
        )));
    }

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(SourceDocument {
        source_name,
        content: SourceContent::Pages(pages),
    })
}

fn load_directory(dir: &Path) -> Result<Vec<SourceDocument>, IngestError> {
    if !dir.is_dir() {
        return Err(IngestError::SourceNotFound(dir.display().to_string()));
    }

    let walker = WalkBuilder::new(dir).standard_filters(false).build();

    let mut docs = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !is_text_file(path) {
            continue;
        }

        // Forward slashes keep ids identical across platforms
        let source_name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        match fs::read(path) {
            Ok(bytes) => {
                debug!("Read {source_name} ({} bytes)", bytes.len());
                docs.push(SourceDocument {
                    source_name,
                    content: SourceContent::Text(String::from_utf8_lossy(&bytes).into_owned()),
                });
            }
            Err(e) => warn!("Skipping unreadable file {}: {e}", path.display()),
        }
    }

    docs.sort_by(|a, b| a.source_name.cmp(&b.source_name));
    info!("Read {} documents from {}", docs.len(), dir.display());
    Ok(docs)
}
