//! Blank-line chunking of source text into retrievable units.
//!
//! Sections are runs of non-blank lines. There is no heading or sentence
//! detection, so a section that mixes topics stays one unit; that is a known
//! precision limit of this chunker.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{Chunk, Location};

/// Separator placed between sections merged into one chunk.
const SECTION_JOIN: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    /// Merge consecutive sections up to a character budget.
    SizeBounded,
    /// Every section is its own chunk.
    PerSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub mode: ChunkMode,
    /// Character budget for [`ChunkMode::SizeBounded`], counted in `char`s.
    pub max_chars: usize,
}

impl ChunkPolicy {
    #[must_use]
    pub fn new(mode: ChunkMode, max_chars: usize) -> Self {
        Self { mode, max_chars }
    }

    #[must_use]
    pub fn size_bounded(max_chars: usize) -> Self {
        Self::new(ChunkMode::SizeBounded, max_chars)
    }

    #[must_use]
    pub fn per_section() -> Self {
        Self::new(ChunkMode::PerSection, 0)
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::size_bounded(400)
    }
}

impl fmt::Display for ChunkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ChunkMode::SizeBounded => write!(f, "size-bounded(max_chars={})", self.max_chars),
            ChunkMode::PerSection => write!(f, "per-section"),
        }
    }
}

/// Split text into trimmed sections separated by one or more blank lines.
pub fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    // `lines` also strips the `\r` of CRLF endings
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                sections.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        sections.push(current.join("\n").trim().to_string());
    }

    sections
}

/// Group sections into chunk texts according to `policy`.
pub fn pack_sections(sections: Vec<String>, policy: &ChunkPolicy) -> Vec<String> {
    match policy.mode {
        ChunkMode::PerSection => sections,
        ChunkMode::SizeBounded => {
            let mut chunks = Vec::new();
            let mut current = String::new();
            let mut current_len = 0usize;

            for section in sections {
                let section_len = section.chars().count();

                if current_len > 0
                    && current_len + section_len + SECTION_JOIN.len() > policy.max_chars
                {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }

                if current_len > 0 {
                    current.push_str(SECTION_JOIN);
                    current_len += SECTION_JOIN.len();
                }
                current.push_str(&section);
                current_len += section_len;
            }

            if !current.is_empty() {
                chunks.push(current);
            }
            chunks
        }
    }
}

/// Chunk one text document. Locations are 1-based section ordinals.
pub fn chunk(source_name: &str, full_text: &str, policy: &ChunkPolicy) -> Vec<Chunk> {
    let prefix = match policy.mode {
        ChunkMode::PerSection => "sec",
        ChunkMode::SizeBounded => "chunk",
    };

    pack_sections(split_sections(full_text), policy)
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let ordinal = i as u32 + 1;
            Chunk {
                id: format!("{source_name}#{prefix}{ordinal}"),
                source_name: source_name.to_string(),
                location: Location::Section { ordinal },
                text,
            }
        })
        .collect()
}

/// Chunk a paged document page by page; chunks never span pages.
pub fn chunk_pages(source_name: &str, pages: &[(u32, String)], policy: &ChunkPolicy) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (page, text) in pages {
        for (i, text) in pack_sections(split_sections(text), policy)
            .into_iter()
            .enumerate()
        {
            let part = i as u32 + 1;
            chunks.push(Chunk {
                id: format!("{source_name}#p{page}.{part}"),
                source_name: source_name.to_string(),
                location: Location::Page { page: *page, part },
                text,
            });
        }
    }

    chunks
}
