//! Offline build path: load a corpus, chunk it, embed the chunks and persist the index.
pub mod chunker;
pub mod core;
pub mod corpus;
