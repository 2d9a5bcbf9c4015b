use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use tinyrelay_agent::{
    mock::MockAgentClient, AgentError, AgentRuntime, ConnectorDescriptor, ReplyMode,
};
use tinyrelay_core::{AppConfig, Classified, ErrorClass};
use tinyrelay_server::{bootstrap_with_client, relay::FALLBACK_REPLY, BootstrapError, MentionRelay};
use tinyrelay_slack::{
    events::{AppMentionEvent, SlackEnvelope, SlackEvent},
    socket::{SocketTransport, TransportError},
    AppMentionHandler, BotIdentity, EventDispatcher, MessagePoster, OutboundMessage,
    ReconnectPolicy, SocketModeRunner, WebApiError,
};
use url::Url;

const BOT_USER: &str = "UBOT";

struct ReplayTransport {
    connected: Mutex<bool>,
    envelopes: Mutex<VecDeque<SlackEnvelope>>,
}

impl ReplayTransport {
    fn new(envelopes: Vec<SlackEnvelope>) -> Self {
        Self { connected: Mutex::new(false), envelopes: Mutex::new(envelopes.into()) }
    }
}

#[async_trait]
impl SocketTransport for ReplayTransport {
    // One session, then every reconnect fails so the runner stops.
    async fn connect(&self) -> Result<(), TransportError> {
        let mut connected = self.connected.lock().expect("lock");
        if *connected {
            return Err(TransportError::Connect("replay finished".to_owned()));
        }
        *connected = true;
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(self.envelopes.lock().expect("lock").pop_front())
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPoster {
    posts: Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl MessagePoster for RecordingPoster {
    async fn post_message(&self, message: &OutboundMessage) -> Result<(), WebApiError> {
        self.posts.lock().expect("lock").push(message.clone());
        Ok(())
    }
}

fn connector() -> ConnectorDescriptor {
    ConnectorDescriptor::new(
        "tinybird",
        Url::parse("https://cloud.tinybird.co/mcp").expect("url"),
        SecretString::from("p.test".to_owned()),
    )
}

fn envelope(id: &str, user: &str, bot_id: Option<&str>, text: &str) -> SlackEnvelope {
    SlackEnvelope {
        envelope_id: id.to_owned(),
        retry_attempt: 0,
        event: SlackEvent::AppMention(AppMentionEvent {
            channel_id: "C1".to_owned(),
            user_id: Some(user.to_owned()),
            bot_id: bot_id.map(str::to_owned),
            text: text.to_owned(),
            ts: format!("1730000000.{id}"),
            thread_ts: None,
        }),
    }
}

async fn relay(
    client: Arc<MockAgentClient>,
    envelopes: Vec<SlackEnvelope>,
) -> Vec<OutboundMessage> {
    let runtime = Arc::new(AgentRuntime::new(client, connector()));
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AppMentionHandler::new(
        BotIdentity::new(BOT_USER, Some("BBOT".to_owned())),
        MentionRelay::new(runtime),
    ));
    let poster = Arc::new(RecordingPoster::default());

    let runner = SocketModeRunner::new(
        Arc::new(ReplayTransport::new(envelopes)),
        dispatcher,
        poster.clone(),
        ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
    );
    let _ = runner.run().await;

    let posts = poster.posts.lock().expect("lock").clone();
    posts
}

#[tokio::test]
async fn events_without_bot_mention_produce_no_posts() {
    let client = Arc::new(MockAgentClient::new());
    let posts = relay(client.clone(), vec![envelope("1", "U1", None, "<@U999> hello")]).await;

    assert!(posts.is_empty());
    assert!(client.prompts().is_empty());
}

#[tokio::test]
async fn bot_authored_events_produce_no_posts() {
    let client = Arc::new(MockAgentClient::new());
    let posts = relay(
        client.clone(),
        vec![
            envelope("1", BOT_USER, None, "<@UBOT> echo"),
            envelope("2", "U2", Some("BBOT"), "<@UBOT> echo"),
        ],
    )
    .await;

    assert!(posts.is_empty());
    assert!(client.prompts().is_empty());
}

#[tokio::test]
async fn valid_mention_posts_exactly_once_with_stripped_prompt() {
    let client = Arc::new(MockAgentClient::new());
    let posts =
        relay(client.clone(), vec![envelope("1", "U1", None, "<@UBOT> top 3 endpoints")]).await;

    assert_eq!(client.prompts(), vec!["top 3 endpoints"]);
    assert_eq!(
        posts,
        vec![OutboundMessage {
            channel: "C1".to_owned(),
            thread_ts: Some("1730000000.1".to_owned()),
            text: "<@U1> answer: top 3 endpoints".to_owned(),
        }]
    );
}

#[tokio::test]
async fn agent_failure_is_contained_and_next_mention_is_answered() {
    let client = Arc::new(MockAgentClient::with_outcomes(vec![Err(AgentError::Unreachable(
        "timed out".to_owned(),
    ))]));
    let posts = relay(
        client.clone(),
        vec![
            envelope("1", "U1", None, "<@UBOT> first"),
            envelope("2", "U2", None, "<@UBOT> second"),
        ],
    )
    .await;

    let texts: Vec<_> = posts.iter().map(|post| post.text.clone()).collect();
    assert_eq!(texts, vec![format!("<@U1> {FALLBACK_REPLY}"), "<@U2> answer: second".to_owned()]);
}

#[tokio::test]
async fn streamed_fragments_concatenate_to_complete_answer() {
    let runtime = AgentRuntime::new(
        Arc::new(MockAgentClient::with_outcomes(vec![
            Ok("rows: 1,024 across 3 pipes".to_owned()),
            Ok("rows: 1,024 across 3 pipes".to_owned()),
        ])),
        connector(),
    );

    let complete = runtime.ask("count", ReplyMode::Complete).await.expect("complete");
    let streamed = runtime.ask("count", ReplyMode::Streaming).await.expect("stream");

    assert_eq!(
        complete.into_text().await.expect("text"),
        streamed.into_text().await.expect("text")
    );
}

#[tokio::test]
async fn event_relay_resolves_identity_through_auth_test() {
    let mut server = mockito::Server::new_async().await;
    let auth = server
        .mock("POST", "/auth.test")
        .with_status(200)
        .with_body(r#"{"ok":true,"user_id":"UBOT","bot_id":"BBOT"}"#)
        .create_async()
        .await;

    let mut config = AppConfig::default();
    config.slack.api_base_url = server.url();
    config.slack.bot_token = SecretString::from("xoxb-test".to_owned());
    let app = bootstrap_with_client(config, Arc::new(MockAgentClient::new())).expect("app");

    app.event_relay().await.expect("runner");
    auth.assert_async().await;
}

#[tokio::test]
async fn rejected_bot_token_is_a_configuration_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth.test")
        .with_status(200)
        .with_body(r#"{"ok":false,"error":"invalid_auth"}"#)
        .create_async()
        .await;

    let mut config = AppConfig::default();
    config.slack.api_base_url = server.url();
    let app = bootstrap_with_client(config, Arc::new(MockAgentClient::new())).expect("app");

    let error = app.event_relay().await.err().expect("auth.test should fail");
    assert!(matches!(error, BootstrapError::SlackIdentity(_)));
    assert_eq!(error.class(), ErrorClass::Configuration);
}
