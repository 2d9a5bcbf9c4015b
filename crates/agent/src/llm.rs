use async_trait::async_trait;
use futures::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use tinyrelay_core::config::ConnectorConfig;
use url::Url;

use crate::error::AgentError;

/// Incremental answer fragments in arrival order. Finite and single-use: once
/// drained it yields nothing more, and replaying means asking again.
pub type ReplyStream = BoxStream<'static, Result<String, AgentError>>;

/// Endpoint plus credential of the remote tool server the agent may query.
#[derive(Clone, Debug)]
pub struct ConnectorDescriptor {
    label: String,
    endpoint: Url,
    credential: SecretString,
}

impl ConnectorDescriptor {
    pub fn new(label: impl Into<String>, endpoint: Url, credential: SecretString) -> Self {
        Self { label: label.into(), endpoint, credential }
    }

    pub fn from_config(config: &ConnectorConfig) -> Result<Self, AgentError> {
        let endpoint = Url::parse(config.url.trim()).map_err(|error| {
            AgentError::InvalidConnector(format!("connector.url `{}`: {error}", config.url))
        })?;
        Ok(Self::new(config.label.trim(), endpoint, config.token.clone()))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Endpoint without the credential; safe to log.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint carrying the credential as the `token` query parameter, the
    /// form the hosted MCP server expects. Never log the result.
    pub fn authorized_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", self.credential.expose_secret());
        url
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Returns the full answer once the remote run, including any tool calls
    /// against `connector`, has finished.
    async fn complete(
        &self,
        prompt: &str,
        connector: &ConnectorDescriptor,
    ) -> Result<String, AgentError>;

    /// Returns fragments whose concatenation equals what `complete` would
    /// have answered for the same prompt.
    async fn stream(
        &self,
        prompt: &str,
        connector: &ConnectorDescriptor,
    ) -> Result<ReplyStream, AgentError>;
}
