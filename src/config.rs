//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RagConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//!
//! Only the completion endpoint triplet (`api_key`, `api_base`, `model`) is
//! required; everything else falls back to the defaults below.
//!
//! # Examples
//!
//! ```no_run
//! use osdr_rag::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use tracing::*;

use crate::error::{RagError, Result};

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RagConfig {
    /// The API key used to authenticate requests to the completion endpoint.
    pub api_key: String,

    /// The base URL of an OpenAI-compatible API.
    pub api_base: String,

    /// The name of the model to be used for generating responses.
    pub model: String,

    /// Upper bound on completion tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    // Stop words
    #[serde(default)]
    pub stop_words: Vec<String>,

    /// Hugging Face repository of the sentence embedding model.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Name of the live collection (an alias onto the current epoch).
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// JSON corpus file, or an `http(s)://` URL serving the same document.
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    /// Records embedded per provider call during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Passages retrieved per question.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Turns kept per session.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Sessions kept in memory; the least recently used one is dropped
    /// past this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Most recent turns rendered into the context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Token budget of the assembled context (cl100k).
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,

    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    #[serde(default = "default_generate_timeout_secs")]
    pub generate_timeout_secs: u64,

    /// Optional YAML file overriding the built-in prompt template.
    #[serde(default)]
    pub prompt_template: Option<String>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_collection_name() -> String {
    "nasa_osd_research".to_string()
}

fn default_corpus_path() -> String {
    "nasa_space_challenge_data.json".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_retrieval_k() -> usize {
    3
}

fn default_history_capacity() -> usize {
    5
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_history_window() -> usize {
    3
}

fn default_context_max_tokens() -> usize {
    6000
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_generate_timeout_secs() -> u64 {
    60
}

impl RagConfig {
    /// A config pointing at `api_base` with every optional field defaulted.
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.into(),
            model: model.into(),
            max_tokens: default_max_tokens(),
            stop_words: Vec::new(),
            embedding_model: default_embedding_model(),
            collection_name: default_collection_name(),
            corpus_path: default_corpus_path(),
            batch_size: default_batch_size(),
            retrieval_k: default_retrieval_k(),
            history_capacity: default_history_capacity(),
            max_sessions: default_max_sessions(),
            history_window: default_history_window(),
            context_max_tokens: default_context_max_tokens(),
            embed_timeout_secs: default_embed_timeout_secs(),
            generate_timeout_secs: default_generate_timeout_secs(),
            prompt_template: None,
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RagError::Config("batch_size must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(RagError::Config("history_capacity must be at least 1".into()));
        }
        if self.max_sessions == 0 {
            return Err(RagError::Config("max_sessions must be at least 1".into()));
        }
        if self.history_window > self.history_capacity {
            return Err(RagError::Config(format!(
                "history_window ({}) exceeds history_capacity ({})",
                self.history_window, self.history_capacity
            )));
        }
        if self.embed_timeout_secs == 0 || self.generate_timeout_secs == 0 {
            return Err(RagError::Config("timeouts must be non-zero".into()));
        }
        if self.collection_name.trim().is_empty() {
            return Err(RagError::Config("collection_name is empty".into()));
        }
        Ok(())
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

/// Loads the application's configuration from a YAML file and validates it.
///
/// # Errors
///
/// - [`RagError::Io`] if the file cannot be read.
/// - [`RagError::Yaml`] if it is not a valid config document.
/// - [`RagError::Config`] if [`RagConfig::validate`] rejects it.
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig> {
    let file = file.as_ref();
    debug!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
