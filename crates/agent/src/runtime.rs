use std::fmt;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::debug;

use crate::error::AgentError;
use crate::llm::{AgentClient, ConnectorDescriptor, ReplyStream};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyMode {
    Complete,
    Streaming,
}

pub enum AgentReply {
    Complete(String),
    Streaming(ReplyStream),
}

impl AgentReply {
    /// Drains the reply into one string, concatenating fragments in order.
    pub async fn into_text(self) -> Result<String, AgentError> {
        match self {
            Self::Complete(text) => Ok(text),
            Self::Streaming(fragments) => fragments.try_collect::<String>().await,
        }
    }
}

impl fmt::Debug for AgentReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Binds the agent client to the process-wide connector. Shared read-only by
/// both relays.
pub struct AgentRuntime {
    client: Arc<dyn AgentClient>,
    connector: ConnectorDescriptor,
}

impl AgentRuntime {
    pub fn new(client: Arc<dyn AgentClient>, connector: ConnectorDescriptor) -> Self {
        Self { client, connector }
    }

    pub fn connector(&self) -> &ConnectorDescriptor {
        &self.connector
    }

    pub async fn ask(&self, prompt: &str, mode: ReplyMode) -> Result<AgentReply, AgentError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AgentError::EmptyPrompt);
        }

        debug!(
            event_name = "agent.ask",
            connector = self.connector.label(),
            mode = ?mode,
            "invoking agent"
        );

        match mode {
            ReplyMode::Complete => {
                self.client.complete(prompt, &self.connector).await.map(AgentReply::Complete)
            }
            ReplyMode::Streaming => {
                self.client.stream(prompt, &self.connector).await.map(AgentReply::Streaming)
            }
        }
    }

    /// Non-streaming convenience used by the event relay.
    pub async fn answer(&self, prompt: &str) -> Result<String, AgentError> {
        self.ask(prompt, ReplyMode::Complete).await?.into_text().await
    }
}
