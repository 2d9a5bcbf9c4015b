use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tinyrelay_core::{config::SlackConfig, Classified, ErrorClass};
use tracing::debug;

use crate::mention::BotIdentity;

/// A message headed for a Slack channel, optionally inside a thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    pub text: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebApiError {
    #[error("slack api `{method}` unreachable: {message}")]
    Http { method: &'static str, message: String },
    #[error("slack api `{method}` returned HTTP {status}")]
    Status { method: &'static str, status: u16 },
    #[error("slack api `{method}` failed: {error}")]
    Api { method: &'static str, error: String },
    #[error("slack api `{method}` response malformed: {message}")]
    Malformed { method: &'static str, message: String },
    #[error("slack http client setup failed: {0}")]
    Client(String),
}

impl WebApiError {
    /// Slack error codes meaning the token itself is wrong, not the request.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Api { error, .. }
                if matches!(error.as_str(), "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked")
        ) || matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

impl Classified for WebApiError {
    fn class(&self) -> ErrorClass {
        if self.is_auth_failure() {
            ErrorClass::Configuration
        } else {
            ErrorClass::Transport
        }
    }
}

#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(&self, message: &OutboundMessage) -> Result<(), WebApiError>;
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct SlackWebClient {
    http: Client,
    base_url: String,
    app_token: SecretString,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(config: &SlackConfig) -> Result<Self, WebApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| WebApiError::Client(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            app_token: config.app_token.clone(),
            bot_token: config.bot_token.clone(),
        })
    }

    /// Resolves the bot's own user id (and bot id) from the bot token.
    pub async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
        const METHOD: &str = "auth.test";
        let envelope = self.call(METHOD, &self.bot_token, None).await?;
        let user_id = envelope.user_id.filter(|id| !id.trim().is_empty()).ok_or_else(|| {
            WebApiError::Malformed { method: METHOD, message: "missing user_id".to_owned() }
        })?;
        debug!(user_id = %user_id, "resolved slack bot identity");
        Ok(BotIdentity::new(user_id, envelope.bot_id))
    }

    /// Asks for a fresh Socket Mode websocket URL. Each URL is single-use, so
    /// every reconnect calls this again.
    pub async fn open_socket_url(&self) -> Result<String, WebApiError> {
        const METHOD: &str = "apps.connections.open";
        let envelope = self.call(METHOD, &self.app_token, None).await?;
        envelope.url.filter(|url| !url.trim().is_empty()).ok_or_else(|| WebApiError::Malformed {
            method: METHOD,
            message: "missing url".to_owned(),
        })
    }

    async fn call(
        &self,
        method: &'static str,
        token: &SecretString,
        body: Option<serde_json::Value>,
    ) -> Result<ApiEnvelope, WebApiError> {
        let request = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token.expose_secret());
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|error| WebApiError::Http { method, message: error.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebApiError::Status { method, status: status.as_u16() });
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|error| WebApiError::Malformed { method, message: error.to_string() })?;

        if !envelope.ok {
            return Err(WebApiError::Api {
                method,
                error: envelope.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }
        Ok(envelope)
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_message(&self, message: &OutboundMessage) -> Result<(), WebApiError> {
        let body = serde_json::to_value(message).map_err(|error| WebApiError::Malformed {
            method: "chat.postMessage",
            message: error.to_string(),
        })?;
        self.call("chat.postMessage", &self.bot_token, Some(body)).await.map(|_| ())
    }
}

/// Escapes the three characters Slack treats as markup in message text.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
