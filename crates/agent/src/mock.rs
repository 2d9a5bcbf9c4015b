use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::error::AgentError;
use crate::llm::{AgentClient, ConnectorDescriptor, ReplyStream};

/// Deterministic in-process agent. Scripted outcomes are consumed in order;
/// once they run out every prompt is echoed back as `answer: <prompt>`.
#[derive(Default)]
pub struct MockAgentClient {
    outcomes: Mutex<VecDeque<Result<String, AgentError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<String, AgentError>>) -> Self {
        Self { outcomes: Mutex::new(outcomes.into()), prompts: Mutex::new(Vec::new()) }
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
    }

    fn next_outcome(&self, prompt: &str) -> Result<String, AgentError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        self.outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front())
            .unwrap_or_else(|| Ok(format!("answer: {prompt}")))
    }
}

/// Splits an answer into word-sized fragments that keep their trailing
/// whitespace, so concatenation restores the original text exactly.
pub fn split_fragments(answer: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for ch in answer.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn complete(
        &self,
        prompt: &str,
        _connector: &ConnectorDescriptor,
    ) -> Result<String, AgentError> {
        self.next_outcome(prompt)
    }

    async fn stream(
        &self,
        prompt: &str,
        _connector: &ConnectorDescriptor,
    ) -> Result<ReplyStream, AgentError> {
        let answer = self.next_outcome(prompt)?;
        Ok(stream::iter(split_fragments(&answer).into_iter().map(Ok)).boxed())
    }
}
