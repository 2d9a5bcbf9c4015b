use std::sync::Arc;

use async_trait::async_trait;
use tinyrelay_agent::AgentRuntime;
use tinyrelay_core::{Classified, IncomingMessage};
use tinyrelay_slack::{
    escape_text, EventContext, EventHandlerError, MentionService, OutboundMessage,
};
use tracing::{info, warn};

pub const FALLBACK_REPLY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again later.";

/// Answers a mention with one threaded reply addressed to its author. Agent
/// failures become the fallback reply so the author always hears back.
pub struct MentionRelay {
    runtime: Arc<AgentRuntime>,
}

impl MentionRelay {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl MentionService for MentionRelay {
    async fn handle_mention(
        &self,
        message: &IncomingMessage,
        ctx: &EventContext,
    ) -> Result<Option<OutboundMessage>, EventHandlerError> {
        info!(
            event_name = "relay.mention.accepted",
            correlation_id = %ctx.correlation_id,
            channel_id = %message.conversation,
            "forwarding mention to agent"
        );

        let body = match self.runtime.answer(&message.text).await {
            Ok(answer) => escape_text(answer.trim()),
            Err(error) => {
                warn!(
                    event_name = "relay.mention.agent_failed",
                    correlation_id = %ctx.correlation_id,
                    channel_id = %message.conversation,
                    error_class = %error.class(),
                    error_kind = error.kind(),
                    error = %error,
                    "agent invocation failed; posting fallback reply"
                );
                FALLBACK_REPLY.to_owned()
            }
        };

        Ok(Some(OutboundMessage {
            channel: message.conversation.clone(),
            thread_ts: message.reply_thread().map(str::to_owned),
            text: format!("<@{}> {body}", message.author),
        }))
    }
}
