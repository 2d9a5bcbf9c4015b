use std::fmt;

/// Coarse failure classes shared by every crate in the workspace. They drive
/// the `error_class` log field and the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Configuration,
    Transport,
    AgentInvocation,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "config_validation",
            Self::Transport => "transport",
            Self::AgentInvocation => "agent_invocation",
        }
    }

    /// Only configuration failures are fatal by construction; anything else
    /// reaching the binary edge is reported as a generic runtime failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::Transport | Self::AgentInvocation => 1,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Classified {
    fn class(&self) -> ErrorClass;
}

impl Classified for crate::config::ConfigError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::{Classified, ErrorClass};
    use crate::config::ConfigError;

    #[test]
    fn configuration_errors_map_to_exit_code_two() {
        let error = ConfigError::Validation("agent.api_key is required".to_string());
        assert_eq!(error.class(), ErrorClass::Configuration);
        assert_eq!(error.class().exit_code(), 2);
        assert_eq!(ErrorClass::AgentInvocation.exit_code(), 1);
    }

    #[test]
    fn class_labels_are_stable_log_values() {
        assert_eq!(ErrorClass::Transport.to_string(), "transport");
        assert_eq!(ErrorClass::AgentInvocation.as_str(), "agent_invocation");
    }
}
