//! Test doubles for the three external capabilities.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generator::CompletionModel;

/// Deterministic bag-of-characters embedder that records every call size.
///
/// Each text maps to a vector whose component `i` counts the bytes equal to
/// `i` modulo the dimension, so identical texts embed identically and texts
/// sharing characters land close together.
pub struct CountingEmbedder {
    dimension: usize,
    calls: Mutex<Vec<usize>>,
    fail_on_call: Option<usize>,
}

impl CountingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        }
    }

    /// Make the `n`th call (1-based) fail with a provider error.
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// Batch sizes seen so far, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        for b in text.bytes() {
            v[b as usize % self.dimension] += 1.0;
        }
        // Keep empty strings away from the zero vector.
        v[0] += 0.5;
        v
    }
}

impl Embedder for CountingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(texts.len());
            calls.len()
        };
        if self.fail_on_call == Some(call) {
            return Err(RagError::provider("embedding", "injected failure"));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that maps known texts to fixed vectors; anything else is an error.
pub struct TableEmbedder {
    dimension: usize,
    table: Vec<(String, Vec<f32>)>,
}

impl TableEmbedder {
    pub fn new(table: &[(&str, Vec<f32>)]) -> Self {
        let dimension = table.first().map(|(_, v)| v.len()).unwrap_or(2);
        Self {
            dimension,
            table: table
                .iter()
                .map(|(t, v)| (t.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| {
                self.table
                    .iter()
                    .find(|(t, _)| t == text)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| RagError::provider("embedding", format!("unknown text {text}")))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that blocks for a fixed time before answering.
pub struct StallingEmbedder {
    delay: Duration,
}

impl StallingEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Embedder for StallingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        std::thread::sleep(self.delay);
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        2
    }
}

/// Scripted completion model: replays queued outcomes, then echoes.
///
/// Every prompt it receives is recorded.
#[derive(Default)]
pub struct ScriptedModel {
    outcomes: Mutex<VecDeque<Outcome>>,
    prompts: Mutex<Vec<String>>,
    completions: AtomicUsize,
}

pub enum Outcome {
    Reply(String),
    Fail,
    Stall(Duration),
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: Outcome) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl CompletionModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.outcomes.lock().unwrap().pop_front();
        let n = self.completions.fetch_add(1, Ordering::SeqCst) + 1;
        match next {
            Some(Outcome::Reply(text)) => Ok(text),
            Some(Outcome::Fail) => Err(RagError::provider("completion", "injected failure")),
            Some(Outcome::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok("too late".to_string())
            }
            None => Ok(format!("answer {n}")),
        }
    }
}
