#![forbid(unsafe_code)]

//! kb_indexer — plan-then-execute incremental indexing engine for a
//! hierarchical knowledge base mirroring a source tree.
//!
//! Pipeline: Discovery → Decision → Plan → (preview) → Execute.
//! Data flows leaf-first: files and the deepest directories are analyzed
//! before their ancestors, because a parent knowledge file textually
//! embeds its children's summaries. The LLM summarizer is expensive, so
//! most of the engine exists to decide when *not* to call it.

pub mod cache;
pub mod core;
pub mod decision;
pub mod discovery;
pub mod execute;
pub mod handlers;
pub mod indexer;
pub mod logger;
pub mod plan;
pub mod prelude;
pub mod status;
pub mod summarizer;
