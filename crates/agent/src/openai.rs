use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{stream, Stream, StreamExt};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tinyrelay_core::config::AgentConfig;
use tracing::debug;

use crate::error::AgentError;
use crate::llm::{AgentClient, ConnectorDescriptor, ReplyStream};

const RESPONSES_PATH: &str = "responses";

/// Client for the OpenAI Responses API. The remote MCP server is attached as a
/// hosted tool, so tool discovery and tool calls run on the service side.
pub struct OpenAiAgentClient {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    instructions: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    tools: Vec<McpTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct McpTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    server_label: String,
    server_url: String,
    require_approval: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<ResponsesResponse>,
}

enum StreamStep {
    Delta(String),
    Skip,
    Done,
    Fail(AgentError),
}

impl OpenAiAgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| AgentError::Unreachable(error.to_string()))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/{RESPONSES_PATH}", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            instructions: config.instructions.clone(),
        })
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        connector: &ConnectorDescriptor,
        stream: bool,
    ) -> ResponsesRequest<'a> {
        ResponsesRequest {
            model: &self.model,
            input: prompt,
            instructions: self.instructions.as_deref(),
            tools: vec![McpTool {
                tool_type: "mcp",
                server_label: connector.label().to_owned(),
                server_url: connector.authorized_url().to_string(),
                require_approval: "never",
            }],
            stream,
        }
    }

    async fn send(&self, body: &ResponsesRequest<'_>) -> Result<reqwest::Response, AgentError> {
        debug!(
            event_name = "agent.request.sent",
            model = %self.model,
            stream = body.stream,
            prompt_chars = body.input.chars().count(),
            "sending agent request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|error| format!("failed to read error response: {error}"));
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl AgentClient for OpenAiAgentClient {
    async fn complete(
        &self,
        prompt: &str,
        connector: &ConnectorDescriptor,
    ) -> Result<String, AgentError> {
        let body = self.request_body(prompt, connector, false);
        let response = self.send(&body).await?;
        let parsed: ResponsesResponse = response.json().await?;
        final_text(parsed)
    }

    async fn stream(
        &self,
        prompt: &str,
        connector: &ConnectorDescriptor,
    ) -> Result<ReplyStream, AgentError> {
        let body = self.request_body(prompt, connector, true);
        let response = self.send(&body).await?;
        Ok(fragments(Box::pin(response.bytes_stream())))
    }
}

fn classify_status(status: StatusCode, body: &str) -> AgentError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_owned());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Unauthorized(message),
        StatusCode::FAILED_DEPENDENCY => AgentError::Connector(message),
        _ => AgentError::Api { status: status.as_u16(), message },
    }
}

/// Remote error for a run that ended as `failed` or `incomplete`. Both reply
/// modes build it the same way so they agree on the outcome.
fn unfinished(status: &str, response: Option<ResponsesResponse>) -> AgentError {
    let response = response.unwrap_or_default();
    if let Some(error) = response.error {
        return AgentError::Remote(error.message);
    }
    match response.incomplete_details.and_then(|details| details.reason) {
        Some(reason) => AgentError::Remote(format!("response {status}: {reason}")),
        None => AgentError::Remote(format!("response {status} without details")),
    }
}

fn final_text(response: ResponsesResponse) -> Result<String, AgentError> {
    let status = response.status.clone().unwrap_or_default();
    if status == "failed" || status == "incomplete" {
        return Err(unfinished(&status, Some(response)));
    }
    if response.error.is_some() {
        return Err(unfinished("failed", Some(response)));
    }

    let mut text = String::new();
    for item in response.output {
        let OutputItem::Message { content } = item else {
            continue;
        };
        for part in content {
            match part {
                ContentPart::OutputText { text: fragment } => text.push_str(&fragment),
                ContentPart::Refusal { refusal } => text.push_str(&refusal),
                ContentPart::Other => {}
            }
        }
    }
    Ok(text)
}

fn interpret(event_name: &str, data: &str) -> StreamStep {
    let event = match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => event,
        Err(error) => {
            return StreamStep::Fail(AgentError::MalformedResponse(format!(
                "undecodable stream event `{event_name}`: {error}"
            )))
        }
    };

    match event.event_type.as_str() {
        "response.output_text.delta" | "response.refusal.delta" => match event.delta {
            Some(delta) if !delta.is_empty() => StreamStep::Delta(delta),
            _ => StreamStep::Skip,
        },
        "response.completed" => StreamStep::Done,
        "response.failed" => StreamStep::Fail(unfinished("failed", event.response)),
        "response.incomplete" => StreamStep::Fail(unfinished("incomplete", event.response)),
        "error" => StreamStep::Fail(AgentError::Remote(
            event.message.unwrap_or_else(|| "stream error without details".to_owned()),
        )),
        _ => StreamStep::Skip,
    }
}

/// Turns a Responses API event-stream body into text fragments. The stream ends
/// at `response.completed` or at the first error it yields.
pub(crate) fn fragments<S, B, E>(bytes: S) -> ReplyStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let events = bytes.eventsource().boxed();

    stream::unfold(Some(events), |events| async move {
        let mut events = events?;
        loop {
            let step = match events.next().await {
                Some(Ok(event)) => interpret(&event.event, &event.data),
                Some(Err(EventStreamError::Transport(error))) => {
                    StreamStep::Fail(AgentError::Unreachable(error.to_string()))
                }
                Some(Err(error)) => StreamStep::Fail(AgentError::MalformedResponse(error.to_string())),
                None => StreamStep::Fail(AgentError::MalformedResponse(
                    "event stream ended before the response completed".to_owned(),
                )),
            };

            match step {
                StreamStep::Delta(text) => return Some((Ok(text), Some(events))),
                StreamStep::Skip => continue,
                StreamStep::Done => return None,
                StreamStep::Fail(error) => return Some((Err(error), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::{stream, StreamExt, TryStreamExt};
    use secrecy::SecretString;
    use tinyrelay_core::config::AgentConfig;
    use url::Url;

    use super::{fragments, OpenAiAgentClient};
    use crate::llm::{AgentClient, ConnectorDescriptor};
    use crate::AgentError;

    fn agent_config(base_url: String) -> AgentConfig {
        AgentConfig {
            api_key: SecretString::from("sk-test".to_owned()),
            base_url,
            model: "gpt-4.1".to_owned(),
            instructions: Some("Answer with data from the workspace.".to_owned()),
            timeout_secs: 5,
        }
    }

    fn connector() -> ConnectorDescriptor {
        ConnectorDescriptor::new(
            "tinybird",
            Url::parse("https://cloud.tinybird.co/mcp").expect("url"),
            SecretString::from("p.secret".to_owned()),
        )
    }

    fn chunked(body: &str, size: usize) -> Vec<Result<Vec<u8>, io::Error>> {
        body.as_bytes().chunks(size).map(|chunk| Ok(chunk.to_vec())).collect()
    }

    const STREAM_BODY: &str = "event: response.created\n\
data: {\"type\":\"response.created\",\"response\":{\"status\":\"in_progress\"}}\n\n\
event: response.mcp_call.in_progress\n\
data: {\"type\":\"response.mcp_call.in_progress\"}\n\n\
event: response.output_text.delta\n\
data: {\"type\":\"response.output_text.delta\",\"delta\":\"There are \"}\n\n\
event: response.output_text.delta\n\
data: {\"type\":\"response.output_text.delta\",\"delta\":\"42 pipes.\"}\n\n\
event: response.completed\n\
data: {\"type\":\"response.completed\",\"response\":{\"status\":\"completed\"}}\n\n";

    #[tokio::test]
    async fn complete_sends_mcp_tool_and_joins_output_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4.1",
                "input": "how many pipes?",
                "instructions": "Answer with data from the workspace.",
                "stream": false,
                "tools": [{
                    "type": "mcp",
                    "server_label": "tinybird",
                    "server_url": "https://cloud.tinybird.co/mcp?token=p.secret",
                    "require_approval": "never"
                }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "status": "completed",
                    "error": null,
                    "output": [
                        {"type": "mcp_list_tools", "server_label": "tinybird", "tools": []},
                        {"type": "mcp_call", "name": "list_pipes", "output": "[]"},
                        {"type": "message", "role": "assistant", "content": [
                            {"type": "output_text", "text": "There are ", "annotations": []},
                            {"type": "output_text", "text": "42 pipes.", "annotations": []}
                        ]}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client =
            OpenAiAgentClient::new(&agent_config(format!("{}/v1/", server.url()))).expect("client");
        let answer = client.complete("how many pipes?", &connector()).await.expect("answer");

        assert_eq!(answer, "There are 42 pipes.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_credentials_are_distinguishable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#)
            .create_async()
            .await;

        let client = OpenAiAgentClient::new(&agent_config(server.url())).expect("client");
        let error = client.complete("hello", &connector()).await.expect_err("401 should fail");

        assert_eq!(error, AgentError::Unauthorized("Incorrect API key provided".to_owned()));
    }

    #[tokio::test]
    async fn failed_dependency_maps_to_connector_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(424)
            .with_body(r#"{"error":{"message":"Error retrieving tool list from MCP server: 'tinybird'"}}"#)
            .create_async()
            .await;

        let client = OpenAiAgentClient::new(&agent_config(server.url())).expect("client");
        let error = client.complete("hello", &connector()).await.expect_err("424 should fail");

        assert!(matches!(error, AgentError::Connector(message) if message.contains("MCP server")));
    }

    #[tokio::test]
    async fn failed_run_in_body_is_a_remote_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_body(r#"{"status":"failed","error":{"code":"server_error","message":"boom"},"output":[]}"#)
            .create_async()
            .await;

        let client = OpenAiAgentClient::new(&agent_config(server.url())).expect("client");
        let error = client.complete("hello", &connector()).await.expect_err("failed run");

        assert_eq!(error, AgentError::Remote("boom".to_owned()));
    }

    #[tokio::test]
    async fn streaming_concatenation_matches_complete_answer() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(STREAM_BODY)
            .create_async()
            .await;

        let client = OpenAiAgentClient::new(&agent_config(server.url())).expect("client");
        let fragments: Vec<String> = client
            .stream("how many pipes?", &connector())
            .await
            .expect("stream")
            .try_collect()
            .await
            .expect("fragments");

        assert_eq!(fragments, vec!["There are ", "42 pipes."]);
        assert_eq!(fragments.concat(), "There are 42 pipes.");
    }

    #[tokio::test]
    async fn fragments_survive_arbitrary_chunking() {
        for size in [1, 7, 64] {
            let collected: Vec<String> = fragments(stream::iter(chunked(STREAM_BODY, size)))
                .try_collect()
                .await
                .expect("fragments");
            assert_eq!(collected.concat(), "There are 42 pipes.", "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn stream_failure_is_yielded_then_stream_ends() {
        let body = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"partial\"}\n\n\
data: {\"type\":\"response.failed\",\"response\":{\"status\":\"failed\",\"error\":{\"message\":\"mcp call failed\"}}}\n\n\
data: {\"type\":\"response.output_text.delta\",\"delta\":\"never\"}\n\n";

        let mut reply = fragments(stream::iter(chunked(body, 16)));

        assert_eq!(reply.next().await, Some(Ok("partial".to_owned())));
        assert_eq!(reply.next().await, Some(Err(AgentError::Remote("mcp call failed".to_owned()))));
        assert_eq!(reply.next().await, None);
        assert_eq!(reply.next().await, None);
    }

    #[tokio::test]
    async fn truncated_stream_reports_malformed_response() {
        let body = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"cut\"}\n\n";
        let collected: Vec<Result<String, AgentError>> =
            fragments(stream::iter(chunked(body, 5))).collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0], Ok("cut".to_owned()));
        assert!(matches!(collected[1], Err(AgentError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_distinguishable() {
        let client = OpenAiAgentClient::new(&agent_config("http://127.0.0.1:9".to_owned()))
            .expect("client");
        let error = client.complete("hello", &connector()).await.expect_err("no listener");

        assert!(matches!(error, AgentError::Unreachable(_)));
    }

    /// Serves `json` to non-streaming calls and `events` to streaming calls,
    /// then returns what each mode produced.
    async fn answer_in_both_modes(
        json: serde_json::Value,
        events: &str,
    ) -> (Result<String, AgentError>, Result<String, AgentError>) {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"stream": false})))
            .with_status(200)
            .with_body(json.to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/responses")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(events)
            .create_async()
            .await;

        let client = OpenAiAgentClient::new(&agent_config(server.url())).expect("client");
        let complete = client.complete("drop all tables", &connector()).await;
        let streamed = match client.stream("drop all tables", &connector()).await {
            Ok(reply) => reply.try_collect::<String>().await,
            Err(error) => Err(error),
        };
        (complete, streamed)
    }

    #[tokio::test]
    async fn refusals_read_the_same_in_both_modes() {
        let json = serde_json::json!({
            "status": "completed",
            "output": [{"type": "message", "role": "assistant", "content": [
                {"type": "refusal", "refusal": "I can't help with that."}
            ]}]
        });
        let events = "data: {\"type\":\"response.refusal.delta\",\"delta\":\"I can't \"}\n\n\
data: {\"type\":\"response.refusal.delta\",\"delta\":\"help with that.\"}\n\n\
data: {\"type\":\"response.refusal.done\",\"refusal\":\"I can't help with that.\"}\n\n\
data: {\"type\":\"response.completed\",\"response\":{\"status\":\"completed\"}}\n\n";

        let (complete, streamed) = answer_in_both_modes(json, events).await;

        assert_eq!(complete, Ok("I can't help with that.".to_owned()));
        assert_eq!(streamed, complete);
    }

    #[tokio::test]
    async fn incomplete_runs_fail_the_same_in_both_modes() {
        let json = serde_json::json!({
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": [{"type": "message", "role": "assistant", "content": [
                {"type": "output_text", "text": "partial"}
            ]}]
        });
        let events = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"partial\"}\n\n\
data: {\"type\":\"response.incomplete\",\"response\":{\"status\":\"incomplete\",\"incomplete_details\":{\"reason\":\"max_output_tokens\"}}}\n\n";

        let (complete, streamed) = answer_in_both_modes(json, events).await;

        let expected = AgentError::Remote("response incomplete: max_output_tokens".to_owned());
        assert_eq!(complete, Err(expected.clone()));
        assert_eq!(streamed, Err(expected));
    }
}
