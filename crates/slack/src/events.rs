use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tinyrelay_core::IncomingMessage;
use tracing::debug;

use crate::mention::BotIdentity;
use crate::web::OutboundMessage;

/// One Socket Mode frame, decoded into the few shapes the relay cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
    Other { frame_type: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub retry_attempt: u32,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppMentionEvent {
    pub channel_id: String,
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("socket frame is not valid json: {0}")]
    Json(String),
    #[error("socket envelope `{0}` is missing its payload")]
    MissingPayload(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    retry_attempt: Option<u32>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    payload: Option<RawPayload>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    event: Option<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

/// Decodes a raw Socket Mode text frame. Every envelope carrying an
/// `envelope_id` comes back as [`SocketFrame::Envelope`] so it can be
/// acknowledged, even when its event is not one the relay handles.
pub fn decode_socket_frame(raw: &str) -> Result<SocketFrame, DecodeError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|error| DecodeError::Json(error.to_string()))?;

    match (frame.frame_type.as_str(), frame.envelope_id) {
        ("hello", _) => Ok(SocketFrame::Hello),
        ("disconnect", _) => Ok(SocketFrame::Disconnect {
            reason: frame.reason.unwrap_or_else(|| "unspecified".to_owned()),
        }),
        ("events_api", Some(envelope_id)) => {
            let payload =
                frame.payload.ok_or_else(|| DecodeError::MissingPayload(envelope_id.clone()))?;
            let event = match payload.event {
                Some(event) => decode_event(event),
                None => SlackEvent::Unsupported { event_type: "events_api".to_owned() },
            };
            Ok(SocketFrame::Envelope(SlackEnvelope {
                envelope_id,
                retry_attempt: frame.retry_attempt.unwrap_or(0),
                event,
            }))
        }
        (_, Some(envelope_id)) => Ok(SocketFrame::Envelope(SlackEnvelope {
            envelope_id,
            retry_attempt: frame.retry_attempt.unwrap_or(0),
            event: SlackEvent::Unsupported { event_type: frame.frame_type },
        })),
        (_, None) => Ok(SocketFrame::Other { frame_type: frame.frame_type }),
    }
}

fn decode_event(event: RawEvent) -> SlackEvent {
    if event.event_type != "app_mention" {
        return SlackEvent::Unsupported { event_type: event.event_type };
    }

    let (Some(channel_id), Some(ts)) = (event.channel, event.ts) else {
        return SlackEvent::Unsupported { event_type: "app_mention_incomplete".to_owned() };
    };

    SlackEvent::AppMention(AppMentionEvent {
        channel_id,
        user_id: event.user.filter(|user| !user.trim().is_empty()),
        bot_id: event.bot_id,
        text: event.text.unwrap_or_default(),
        ts,
        thread_ts: event.thread_ts.filter(|thread_ts| !thread_ts.trim().is_empty()),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("mention handler failure: {0}")]
    Mention(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Answers one mention that already passed filtering. The message text has the
/// bot's mention removed.
#[async_trait]
pub trait MentionService: Send + Sync {
    async fn handle_mention(
        &self,
        message: &IncomingMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutboundMessage>, EventHandlerError>;
}

pub struct AppMentionHandler<S> {
    identity: BotIdentity,
    service: S,
}

impl<S> AppMentionHandler<S>
where
    S: MentionService,
{
    pub fn new(identity: BotIdentity, service: S) -> Self {
        Self { identity, service }
    }
}

#[async_trait]
impl<S> EventHandler for AppMentionHandler<S>
where
    S: MentionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if self.identity.authored(event.user_id.as_deref(), event.bot_id.as_deref()) {
            debug!(correlation_id = %ctx.correlation_id, "ignoring mention authored by the bot");
            return Ok(HandlerResult::Ignored);
        }
        let Some(author) = event.user_id.clone() else {
            debug!(correlation_id = %ctx.correlation_id, "ignoring mention without a user");
            return Ok(HandlerResult::Ignored);
        };
        if !self.identity.is_mentioned_in(&event.text) {
            debug!(correlation_id = %ctx.correlation_id, "ignoring event not addressed to the bot");
            return Ok(HandlerResult::Ignored);
        }

        let text = self.identity.strip_mention(&event.text);
        if text.is_empty() {
            debug!(correlation_id = %ctx.correlation_id, "ignoring mention with no prompt text");
            return Ok(HandlerResult::Ignored);
        }

        let message = IncomingMessage {
            author,
            conversation: event.channel_id.clone(),
            text,
            ts: Some(event.ts.clone()),
            thread_ts: event.thread_ts.clone(),
        };

        let reply = self.service.handle_mention(&message, ctx).await?;
        Ok(match reply {
            Some(reply) => HandlerResult::Responded(reply),
            None => HandlerResult::Processed,
        })
    }
}
