use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub agent: AgentConfig,
    pub connector: ConnectorConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub api_base_url: String,
    /// Per-request limit for Web API calls.
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub instructions: Option<String>,
    pub timeout_secs: u64,
}

/// Remote MCP server the agent is allowed to call while answering.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    pub label: String,
    pub url: String,
    pub token: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Which relay the process is about to run. Slack credentials are only
/// required when subscribing to events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Events,
    Interactive,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_api_base_url: Option<String>,
    pub agent_api_key: Option<String>,
    pub agent_base_url: Option<String>,
    pub agent_model: Option<String>,
    pub connector_url: Option<String>,
    pub connector_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub mode: RunMode,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
                timeout_secs: 30,
            },
            agent: AgentConfig {
                api_key: String::new().into(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4.1".to_string(),
                instructions: None,
                timeout_secs: 120,
            },
            connector: ConnectorConfig {
                label: "tinybird".to_string(),
                url: "https://cloud.tinybird.co/mcp".to_string(),
                token: String::new().into(),
            },
            logging: LoggingConfig { level: "warn".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tinyrelay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate(options.mode)?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_app_token_value) = slack.app_token {
                self.slack.app_token = secret_value(slack_app_token_value);
            }
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = slack.timeout_secs {
                self.slack.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(agent_api_key_value) = agent.api_key {
                self.agent.api_key = secret_value(agent_api_key_value);
            }
            if let Some(base_url) = agent.base_url {
                self.agent.base_url = base_url;
            }
            if let Some(model) = agent.model {
                self.agent.model = model;
            }
            if let Some(instructions) = agent.instructions {
                self.agent.instructions = Some(instructions);
            }
            if let Some(timeout_secs) = agent.timeout_secs {
                self.agent.timeout_secs = timeout_secs;
            }
        }

        if let Some(connector) = patch.connector {
            if let Some(label) = connector.label {
                self.connector.label = label;
            }
            if let Some(url) = connector.url {
                self.connector.url = url;
            }
            if let Some(connector_token_value) = connector.token {
                self.connector.token = secret_value(connector_token_value);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env_alias("TINYRELAY_SLACK_APP_TOKEN", "SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env_alias("TINYRELAY_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("TINYRELAY_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("TINYRELAY_SLACK_TIMEOUT_SECS") {
            self.slack.timeout_secs = parse_u64("TINYRELAY_SLACK_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env_alias("TINYRELAY_AGENT_API_KEY", "OPENAI_API_KEY") {
            self.agent.api_key = secret_value(value);
        }
        if let Some(value) = read_env("TINYRELAY_AGENT_BASE_URL") {
            self.agent.base_url = value;
        }
        if let Some(value) = read_env("TINYRELAY_AGENT_MODEL") {
            self.agent.model = value;
        }
        if let Some(value) = read_env("TINYRELAY_AGENT_INSTRUCTIONS") {
            self.agent.instructions = Some(value);
        }
        if let Some(value) = read_env("TINYRELAY_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_u64("TINYRELAY_AGENT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TINYRELAY_CONNECTOR_LABEL") {
            self.connector.label = value;
        }
        if let Some(value) = read_env("TINYRELAY_CONNECTOR_URL") {
            self.connector.url = value;
        }
        if let Some(value) = read_env_alias("TINYRELAY_CONNECTOR_TOKEN", "TINYBIRD_TOKEN") {
            self.connector.token = secret_value(value);
        }

        if let Some(value) = read_env_alias("TINYRELAY_LOGGING_LEVEL", "TINYRELAY_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env_alias("TINYRELAY_LOGGING_FORMAT", "TINYRELAY_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(api_base_url) = overrides.slack_api_base_url {
            self.slack.api_base_url = api_base_url;
        }
        if let Some(agent_api_key) = overrides.agent_api_key {
            self.agent.api_key = secret_value(agent_api_key);
        }
        if let Some(agent_base_url) = overrides.agent_base_url {
            self.agent.base_url = agent_base_url;
        }
        if let Some(agent_model) = overrides.agent_model {
            self.agent.model = agent_model;
        }
        if let Some(connector_url) = overrides.connector_url {
            self.connector.url = connector_url;
        }
        if let Some(connector_token) = overrides.connector_token {
            self.connector.token = secret_value(connector_token);
        }
    }

    pub fn validate(&self, mode: RunMode) -> Result<(), ConfigError> {
        if mode == RunMode::Events {
            validate_slack(&self.slack)?;
        }
        validate_agent(&self.agent)?;
        validate_connector(&self.connector)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tinyrelay.toml"), PathBuf::from("config/tinyrelay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required (set TINYRELAY_SLACK_APP_TOKEN or SLACK_APP_TOKEN). Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required (set TINYRELAY_SLACK_BOT_TOKEN or SLACK_BOT_TOKEN). Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.timeout_secs == 0 || slack.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "slack.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    validate_http_url("slack.api_base_url", &slack.api_base_url)
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.api_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "agent.api_key is required (set TINYRELAY_AGENT_API_KEY or OPENAI_API_KEY)".to_string(),
        ));
    }

    if agent.model.trim().is_empty() {
        return Err(ConfigError::Validation("agent.model must not be empty".to_string()));
    }

    if agent.timeout_secs == 0 || agent.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agent.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    validate_http_url("agent.base_url", &agent.base_url)
}

fn validate_connector(connector: &ConnectorConfig) -> Result<(), ConfigError> {
    if connector.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "connector.token is required (set TINYRELAY_CONNECTOR_TOKEN or TINYBIRD_TOKEN)"
                .to_string(),
        ));
    }

    if connector.label.trim().is_empty() {
        return Err(ConfigError::Validation("connector.label must not be empty".to_string()));
    }

    validate_http_url("connector.url", &connector.url)
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value.trim()).map_err(|error| {
        ConfigError::Validation(format!("{key} must be a valid URL (`{value}`: {error})"))
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "{key} must use http:// or https:// (found `{other}`)"
        ))),
    }
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_env_alias(key: &str, alias: &str) -> Option<String> {
    read_env(key).or_else(|| read_env(alias))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    agent: Option<AgentPatch>,
    connector: Option<ConnectorPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectorPatch {
    label: Option<String>,
    url: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
