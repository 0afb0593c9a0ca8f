//! # Prompt template
//!
//! The generator wraps every question in one fixed instructional prompt. The
//! template body has two placeholders, `{query}` and `{context}`, which are
//! substituted verbatim in a single pass: a question that itself contains
//! `{context}` is passed through literally and never expanded.
//!
//! A deployment can replace the built-in wording with a YAML file:
//!
//! ```yaml
//! system_prompt: "You are a concise research assistant."
//! body: |
//!   Question: {query}
//!
//!   Sources: {context}
//!
//!   Answer:
//! ```
//!
//! Both fields are optional; a missing one keeps the default.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

use crate::error::{RagError, Result};

const QUERY: &str = "{query}";
const CONTEXT: &str = "{context}";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI assistant specializing in NASA's Office of Space Development (OSD) research.";

const DEFAULT_BODY: &str = "Query: {query}

Context: {context}

You are an AI assistant specializing in NASA's Office of Space Development (OSD) research. \
Based on the given context, which includes previous conversation history and retrieved documents, \
please provide a concise and informative answer to the query. Focus on OSD-related information and \
ongoing research projects. If the context doesn't contain relevant information, state that you don't \
have enough information to answer accurately. Always consider the entire context, including previous \
exchanges, when formulating your response.

Answer:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplate {
    /// Sent as the system message.
    pub system_prompt: String,
    /// User message with `{query}` and `{context}` placeholders.
    pub body: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Fill the placeholders. Text inside `query` and `context` is never
    /// scanned for placeholders.
    pub fn render(&self, query: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.body.len() + query.len() + context.len());
        let mut rest = self.body.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix(QUERY) {
                out.push_str(query);
                rest = after;
            } else if let Some(after) = tail.strip_prefix(CONTEXT) {
                out.push_str(context);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }

    fn validate(&self) -> Result<()> {
        if !self.body.contains(QUERY) {
            return Err(RagError::Config(format!(
                "prompt template body has no {QUERY} placeholder"
            )));
        }
        Ok(())
    }
}

/// Load a prompt template from a YAML file.
///
/// # Errors
/// I/O and YAML errors, or a body without a `{query}` placeholder.
pub fn load_template(path: impl AsRef<Path>) -> Result<PromptTemplate> {
    let path = path.as_ref();
    info!("Loading prompt template: {}", path.display());

    let content = fs::read_to_string(path)?;
    let template: PromptTemplate = serde_yaml::from_str(&content)?;
    template.validate()?;
    Ok(template)
}
