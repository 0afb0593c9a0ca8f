//! # Generation
//!
//! [`CompletionModel`] is the seam to the generative model: one prompt in,
//! one text out. [`OpenAiModel`] talks to any OpenAI-compatible
//! chat-completions endpoint (OpenAI itself, a local llama.cpp/vLLM server,
//! or Gemini's OpenAI-compatible endpoint).
//!
//! [`Generator`] puts the question and its context through the
//! [`PromptTemplate`] and calls the model under a deadline. It reports
//! failures as errors; turning them into the user-facing [`APOLOGY`] is the
//! orchestrator's job, so it can also tell the caller the answer is degraded.
//!
//! ```no_run
//! use osdr_rag::config::RagConfig;
//! use osdr_rag::generator::{Generator, OpenAiModel};
//! use osdr_rag::prompt::PromptTemplate;
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn run() -> osdr_rag::Result<()> {
//! let config = RagConfig::new("sk-...", "https://api.openai.com/v1", "gpt-4o-mini");
//! let template = PromptTemplate::default();
//! let model = OpenAiModel::from_config(&config, &template.system_prompt);
//! let generator = Generator::new(Arc::new(model), template, Duration::from_secs(60));
//!
//! let text = generator.generate("What did Rodent Research 1 study?", "").await?;
//! println!("{text}");
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::debug;

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::prompt::PromptTemplate;

/// Shown to the user whenever generation fails.
pub const APOLOGY: &str =
    "I apologize, but I encountered an error while generating the response. Please try again.";

/// A generative model reachable with a single prompt.
pub trait CompletionModel: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    stop_words: Vec<String>,
    system_prompt: String,
}

/// Creates a new OpenAI API client from configuration.
fn create_client(config: &RagConfig) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    debug!(api_base = %config.api_base, model = %config.model, "completion client created");
    Client::with_config(openai_config)
}

impl OpenAiModel {
    pub fn from_config(config: &RagConfig, system_prompt: &str) -> Self {
        Self {
            client: create_client(config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            stop_words: config.stop_words.clone(),
            system_prompt: system_prompt.to_string(),
        }
    }

    fn messages(&self, prompt: &str) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(
                        self.system_prompt.clone(),
                    ),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
            },
        ));
        messages
    }
}

impl CompletionModel for OpenAiModel {
    #[allow(deprecated)]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.max_tokens(self.max_tokens)
            .model(self.model.clone())
            .messages(self.messages(prompt));
        if !self.stop_words.is_empty() {
            args.stop(self.stop_words.clone());
        }
        let request = args.build()?;

        debug!(model = %self.model, prompt_chars = prompt.len(), "sending completion request");

        let response = self.client.chat().create(request).await?;

        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();
        if text.trim().is_empty() {
            return Err(RagError::provider("completion", "model returned no text"));
        }
        Ok(text)
    }
}

/// Prompt rendering plus a deadline around the model call.
pub struct Generator<M> {
    model: Arc<M>,
    template: PromptTemplate,
    timeout: Duration,
}

impl<M: CompletionModel> Generator<M> {
    pub fn new(model: Arc<M>, template: PromptTemplate, timeout: Duration) -> Self {
        Self {
            model,
            template,
            timeout,
        }
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Answer `query` from `context`.
    ///
    /// # Errors
    /// Whatever the model reports, or [`RagError::Timeout`] past the deadline.
    pub async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let prompt = self.template.render(query, context);
        match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout {
                operation: "generate",
                elapsed: self.timeout,
            }),
        }
    }
}
