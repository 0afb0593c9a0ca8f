//! # osdr_rag (library root)
//!
//! Question answering over the NASA Open Science Data Repository study
//! catalogue: the corpus is embedded into an in-process vector index, the
//! most similar studies are retrieved for each question, and an
//! OpenAI-compatible model answers from those studies plus the last few
//! turns of the conversation.
//!
//! ```text
//! corpus ──► ingest ──► index (alias ─► epoch N)
//!                          ▲
//! question ──► retriever ──┘──► context (history + passages) ──► generator ──► Answer
//!                                   ▲                                 │
//!                                   └──────── conversation ◄──────────┘
//! ```
//!
//! ## Modules
//! - [`corpus`]: study records and their canonical text, file/HTTP loading
//! - [`embedding`]: the [`Embedder`](embedding::Embedder) seam and a local MiniLM model
//! - [`index`]: the [`VectorIndex`](index::VectorIndex) seam and an HNSW implementation with aliases
//! - [`ingest`]: epoch-by-epoch index rebuilds
//! - [`retriever`], [`prompt`], [`generator`]: the per-question steps
//! - [`conversation`]: per-session bounded history
//! - [`pipeline`]: [`RagPipeline`], which ties it all together
//! - [`config`], [`commands`], [`error`]
//!
//! ## Quick start
//! ```no_run
//! use osdr_rag::{RagPipeline, config::load_config, corpus::load_corpus};
//! use osdr_rag::{embedding::MiniLmEmbedder, generator::OpenAiModel, index::HnswVectorIndex};
//! use osdr_rag::prompt::PromptTemplate;
//! use std::sync::Arc;
//!
//! # async fn run() -> osdr_rag::Result<()> {
//! let config = load_config("config.yaml")?;
//! let template = PromptTemplate::default();
//! let pipeline = RagPipeline::new(
//!     Arc::new(MiniLmEmbedder::load(&config.embedding_model)?),
//!     Arc::new(HnswVectorIndex::new()),
//!     Arc::new(OpenAiModel::from_config(&config, &template.system_prompt)),
//!     template,
//!     &config,
//! )?;
//!
//! pipeline.reindex(&load_corpus(&config.corpus_path)?).await?;
//! let answer = pipeline.answer("default", "Which studies looked at bone loss?").await;
//! println!("{}", answer.text);
//! # Ok(()) }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod conversation;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod retriever;

#[cfg(test)]
mod testing;

pub use error::{RagError, Result};
pub use pipeline::{Answer, AnswerStatus, RagPipeline};

/// Per-platform configuration directory, e.g. `~/.config/osdr` on Linux.
///
/// # Errors
/// [`RagError::Config`] when no home directory can be determined.
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("gov", "nasa-osdr", "osdr")
        .ok_or_else(|| RagError::Config("Unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
