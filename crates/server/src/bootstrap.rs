use std::sync::Arc;

use thiserror::Error;
use tinyrelay_agent::{AgentClient, AgentError, AgentRuntime, ConnectorDescriptor, OpenAiAgentClient};
use tinyrelay_core::{
    config::{AppConfig, ConfigError},
    Classified, ErrorClass,
};
use tinyrelay_slack::{
    AppMentionHandler, EventDispatcher, ReconnectPolicy, SlackWebClient, SocketModeRunner,
    WebApiError, WebSocketTransport,
};
use tracing::info;

use crate::relay::MentionRelay;

pub struct Application {
    pub config: AppConfig,
    pub agent_runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("agent client setup failed: {0}")]
    Agent(#[from] AgentError),
    #[error("slack web client setup failed: {0}")]
    SlackClient(#[source] WebApiError),
    #[error("slack identity lookup failed: {0}")]
    SlackIdentity(#[source] WebApiError),
}

impl Classified for BootstrapError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Config(error) => error.class(),
            Self::Agent(error) => error.class(),
            Self::SlackClient(error) | Self::SlackIdentity(error) => error.class(),
        }
    }
}

/// Wires a loaded configuration to the production agent client.
pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        agent_base_url = %config.agent.base_url,
        "starting application bootstrap"
    );
    let client = OpenAiAgentClient::new(&config.agent)?;
    bootstrap_with_client(config, Arc::new(client))
}

/// Wires an already validated configuration to the given agent client.
pub fn bootstrap_with_client(
    config: AppConfig,
    client: Arc<dyn AgentClient>,
) -> Result<Application, BootstrapError> {
    let connector = ConnectorDescriptor::from_config(&config.connector)?;
    info!(
        event_name = "system.bootstrap.connector_bound",
        correlation_id = "bootstrap",
        connector = connector.label(),
        endpoint = %connector.endpoint(),
        model = %config.agent.model,
        "agent runtime ready"
    );

    Ok(Application { agent_runtime: Arc::new(AgentRuntime::new(client, connector)), config })
}

impl Application {
    /// Resolves the bot identity and assembles the Socket Mode runner that
    /// feeds mentions through [`MentionRelay`].
    pub async fn event_relay(&self) -> Result<SocketModeRunner, BootstrapError> {
        let web =
            Arc::new(SlackWebClient::new(&self.config.slack).map_err(BootstrapError::SlackClient)?);
        let identity = web.auth_test().await.map_err(BootstrapError::SlackIdentity)?;
        info!(
            event_name = "system.bootstrap.slack_identity",
            correlation_id = "bootstrap",
            bot_user_id = %identity.user_id,
            "resolved slack bot identity"
        );

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(AppMentionHandler::new(
            identity,
            MentionRelay::new(self.agent_runtime.clone()),
        ));

        Ok(SocketModeRunner::new(
            Arc::new(WebSocketTransport::new(web.clone())),
            dispatcher,
            web,
            ReconnectPolicy::default(),
        ))
    }
}
