//! # RAG orchestrator
//!
//! [`RagPipeline::answer`] runs one conversational turn:
//!
//! 1. take the session's history lock (turns in a session are serialised),
//! 2. render the last few turns as `Q:`/`A:` blocks,
//! 3. retrieve the top-k passages for the question,
//! 4. join history and passages into one context, dropping trailing
//!    passages while it exceeds the token budget,
//! 5. generate, and on success append the turn to the history.
//!
//! `answer` never fails. A retrieval failure still produces an answer (from
//! history alone) flagged [`AnswerStatus::RetrievalDegraded`]; a generation
//! failure yields the fixed [`APOLOGY`] flagged
//! [`AnswerStatus::GenerationFailed`] and leaves the history untouched.

use serde::Serialize;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::{error, info, warn};

use crate::config::RagConfig;
use crate::conversation::{ConversationStore, ConversationTurn};
use crate::corpus::CorpusRecord;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generator::{APOLOGY, CompletionModel, Generator};
use crate::index::VectorIndex;
use crate::ingest::{IngestReport, Ingestor};
use crate::prompt::PromptTemplate;
use crate::retriever::Retriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Retrieval and generation both succeeded.
    Answered,
    /// Retrieval failed; the answer was generated from history alone.
    RetrievalDegraded,
    /// Generation failed; `text` is the apology.
    GenerationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub status: AnswerStatus,
    /// Passages that went into the context, most similar first.
    pub passages: Vec<String>,
}

impl Answer {
    pub fn is_degraded(&self) -> bool {
        self.status != AnswerStatus::Answered
    }
}

/// Per-turn knobs, taken from [`RagConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub retrieval_k: usize,
    pub history_window: usize,
    pub context_max_tokens: usize,
}

impl From<&RagConfig> for PipelineSettings {
    fn from(config: &RagConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            retrieval_k: config.retrieval_k,
            history_window: config.history_window,
            context_max_tokens: config.context_max_tokens,
        }
    }
}

pub struct RagPipeline<E: ?Sized, I: ?Sized, M> {
    ingestor: Ingestor<E, I>,
    retriever: Retriever<E, I>,
    generator: Generator<M>,
    conversations: ConversationStore,
    settings: PipelineSettings,
    bpe: CoreBPE,
}

impl<E, I, M> RagPipeline<E, I, M>
where
    E: Embedder + ?Sized + 'static,
    I: VectorIndex + ?Sized,
    M: CompletionModel,
{
    /// Wire the pipeline around its three collaborators.
    ///
    /// Ingestion writes, and retrieval reads, the alias
    /// `config.collection_name`.
    pub fn new(
        embedder: Arc<E>,
        index: Arc<I>,
        model: Arc<M>,
        template: PromptTemplate,
        config: &RagConfig,
    ) -> Result<Self> {
        let bpe = cl100k_base()
            .map_err(|e| RagError::Config(format!("loading cl100k tokenizer: {e}")))?;

        Ok(Self {
            ingestor: Ingestor::new(
                Arc::clone(&embedder),
                Arc::clone(&index),
                config.collection_name.clone(),
                config.embed_timeout(),
            ),
            retriever: Retriever::new(
                embedder,
                index,
                config.collection_name.clone(),
                config.embed_timeout(),
            ),
            generator: Generator::new(model, template, config.generate_timeout()),
            conversations: ConversationStore::new(config.history_capacity)
                .with_max_sessions(config.max_sessions),
            settings: PipelineSettings::from(config),
            bpe,
        })
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Rebuild the index from `records`. Queries keep being served from the
    /// previous epoch until the new one is live.
    pub async fn reindex(&self, records: &[CorpusRecord]) -> Result<IngestReport> {
        self.ingestor.ingest(records, self.settings.batch_size).await
    }

    /// Answer `query` within `session`.
    pub async fn answer(&self, session: &str, query: &str) -> Answer {
        let shared = self.conversations.session(session);
        let mut history = shared.lock().await;

        info!(session, history = history.len(), "answering");

        let history_text = history.render(self.settings.history_window);

        let (mut passages, retrieval_ok) =
            match self.retriever.try_retrieve(query, self.settings.retrieval_k).await {
                Ok(passages) => (passages, true),
                Err(e) => {
                    warn!(session, error = %e, "retrieval failed; answering from history only");
                    (Vec::new(), false)
                }
            };
        info!(session, retrieved = passages.len(), "retrieved documents");

        let (context, used) = self.assemble_context(&history_text, &passages);
        if used < passages.len() {
            warn!(
                session,
                dropped = passages.len() - used,
                budget = self.settings.context_max_tokens,
                "context over budget; dropping passages"
            );
            passages.truncate(used);
        }

        match self.generator.generate(query, &context).await {
            Ok(text) => {
                history.append(ConversationTurn::new(query, text.clone()));
                info!(session, "generated response");
                Answer {
                    text,
                    status: if retrieval_ok {
                        AnswerStatus::Answered
                    } else {
                        AnswerStatus::RetrievalDegraded
                    },
                    passages,
                }
            }
            Err(e) => {
                error!(session, error = %e, "generation failed");
                Answer {
                    text: APOLOGY.to_string(),
                    status: AnswerStatus::GenerationFailed,
                    passages,
                }
            }
        }
    }

    /// Join history and passages; returns the context and how many passages
    /// made it in.
    fn assemble_context(&self, history: &str, passages: &[String]) -> (String, usize) {
        assemble_context(&self.bpe, history, passages, self.settings.context_max_tokens)
    }
}

/// `history + " " + passages` (passages space-joined), or `history` alone
/// when there are no passages. Trailing passages are dropped while the
/// result is over `max_tokens`; history is never cut.
pub fn assemble_context(
    bpe: &CoreBPE,
    history: &str,
    passages: &[String],
    max_tokens: usize,
) -> (String, usize) {
    let render = |used: usize| {
        if used == 0 {
            history.to_string()
        } else {
            format!("{history} {}", passages[..used].join(" "))
        }
    };

    let mut used = passages.len();
    let mut context = render(used);
    while used > 0 && bpe.encode_with_special_tokens(&context).len() > max_tokens {
        used -= 1;
        context = render(used);
    }
    (context, used)
}
