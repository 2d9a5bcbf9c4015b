use thiserror::Error;
use tinyrelay_core::{Classified, ErrorClass};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("agent service unreachable: {0}")]
    Unreachable(String),
    #[error("agent credential rejected: {0}")]
    Unauthorized(String),
    #[error("connector unavailable: {0}")]
    Connector(String),
    #[error("agent api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("agent run failed: {0}")]
    Remote(String),
    #[error("malformed agent response: {0}")]
    MalformedResponse(String),
    #[error("invalid connector descriptor: {0}")]
    InvalidConnector(String),
}

impl AgentError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "empty_prompt",
            Self::Unreachable(_) => "unreachable",
            Self::Unauthorized(_) => "unauthorized",
            Self::Connector(_) => "connector",
            Self::Api { .. } => "api",
            Self::Remote(_) => "remote",
            Self::MalformedResponse(_) => "malformed_response",
            Self::InvalidConnector(_) => "invalid_connector",
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::MalformedResponse(error.to_string())
        } else {
            Self::Unreachable(error.to_string())
        }
    }
}

impl Classified for AgentError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidConnector(_) => ErrorClass::Configuration,
            _ => ErrorClass::AgentInvocation,
        }
    }
}
