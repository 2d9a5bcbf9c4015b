use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tinyrelay_core::{Classified, ErrorClass};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::events::{
    decode_socket_frame, EventContext, EventDispatcher, HandlerResult, SlackEnvelope, SlackEvent,
    SocketFrame,
};
use crate::web::{MessagePoster, SlackWebClient};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport credentials rejected: {0}")]
    Unauthorized(String),
    #[error("socket mode link terminated by slack: {0}")]
    Terminated(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("socket mode gave up after {attempts} consecutive failed connects: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
}

impl Classified for SocketError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(TransportError::Unauthorized(_) | TransportError::Terminated(_)) => {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Transport,
        }
    }
}

/// Bounds reconnects after consecutive failed connects. A successful connect
/// resets the count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Disconnect reasons after which reconnecting cannot succeed until the app
/// configuration changes.
pub fn is_terminal_disconnect(reason: &str) -> bool {
    matches!(reason, "link_disabled")
}

/// A Socket Mode session source. `next_envelope` yields `Ok(None)` when the
/// session ended normally (server close or a `disconnect` request) and
/// `Err(TransportError::Terminated)` when Slack disabled the link.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode over a real websocket. Every connect asks Slack for a fresh URL.
pub struct WebSocketTransport {
    web: Arc<SlackWebClient>,
    stream: Mutex<Option<WsStream>>,
}

impl WebSocketTransport {
    pub fn new(web: Arc<SlackWebClient>) -> Self {
        Self { web, stream: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.web.open_socket_url().await.map_err(|error| {
            if error.is_auth_failure() {
                TransportError::Unauthorized(error.to_string())
            } else {
                TransportError::Connect(error.to_string())
            }
        })?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(raw))) => match decode_socket_frame(raw.as_str()) {
                    Ok(SocketFrame::Envelope(envelope)) => return Ok(Some(envelope)),
                    Ok(SocketFrame::Hello) => debug!("socket mode hello received"),
                    Ok(SocketFrame::Disconnect { reason }) => {
                        if is_terminal_disconnect(&reason) {
                            return Err(TransportError::Terminated(reason));
                        }
                        info!(reason = %reason, "slack requested socket mode disconnect");
                        return Ok(None);
                    }
                    Ok(SocketFrame::Other { frame_type }) => {
                        debug!(frame_type = %frame_type, "ignoring socket mode frame");
                    }
                    Err(error) => warn!(error = %error, "ignoring undecodable socket mode frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|error| TransportError::Receive(error.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "socket mode closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("socket is not connected".to_owned()));
        };

        let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        stream
            .send(Message::Text(ack.into()))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        match stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(error) => Err(TransportError::Disconnect(error.to_string())),
        }
    }
}

/// Pumps envelopes one at a time: acknowledge, dispatch, then post any reply.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
    poster: Arc<dyn MessagePoster>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        poster: Arc<dyn MessagePoster>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, poster, reconnect_policy }
    }

    /// Runs until the transport fails to connect more than `max_retries`
    /// times in a row, rejects the credentials, or Slack terminates the link.
    /// Sessions that end without delivering anything back off like failed
    /// connects, without counting toward `max_retries`.
    pub async fn run(&self) -> Result<(), SocketError> {
        let mut failures: u32 = 0;
        let mut idle_sessions: u32 = 0;

        loop {
            info!(consecutive_failures = failures, "opening socket mode transport connection");
            if let Err(transport_error) = self.transport.connect().await {
                if matches!(transport_error, TransportError::Unauthorized(_)) {
                    error!(error = %transport_error, "socket mode credentials rejected");
                    return Err(transport_error.into());
                }

                failures += 1;
                warn!(
                    attempt = failures,
                    max_retries = self.reconnect_policy.max_retries,
                    error = %transport_error,
                    "socket mode transport failed to connect"
                );
                if failures > self.reconnect_policy.max_retries {
                    return Err(SocketError::RetriesExhausted {
                        attempts: failures,
                        last: transport_error,
                    });
                }

                let delay = self.reconnect_policy.backoff(failures - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            failures = 0;
            info!("socket mode transport connected");

            let mut delivered = 0_usize;
            let outcome = self.pump(&mut delivered).await;
            if let Err(transport_error) = self.transport.disconnect().await {
                debug!(error = %transport_error, "socket mode disconnect failed");
            }

            match outcome {
                Ok(()) => info!(delivered, "socket mode session ended; reconnecting"),
                Err(TransportError::Terminated(reason)) => {
                    error!(reason = %reason, "socket mode link terminated by slack");
                    return Err(TransportError::Terminated(reason).into());
                }
                Err(transport_error) => {
                    warn!(delivered, error = %transport_error, "socket mode session failed; reconnecting");
                }
            }

            if delivered > 0 {
                idle_sessions = 0;
                tokio::task::yield_now().await;
            } else {
                idle_sessions += 1;
                let delay = self.reconnect_policy.backoff(idle_sessions - 1);
                debug!(
                    idle_sessions,
                    delay_ms = delay.as_millis() as u64,
                    "session delivered nothing; backing off"
                );
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn pump(&self, delivered: &mut usize) -> Result<(), TransportError> {
        while let Some(envelope) = self.transport.next_envelope().await? {
            *delivered += 1;
            self.handle_envelope(&envelope).await;
        }
        Ok(())
    }

    async fn handle_envelope(&self, envelope: &SlackEnvelope) {
        let (channel_id, thread_id) = correlation_fields(envelope);

        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            retry_attempt = envelope.retry_attempt,
            correlation_id = %envelope.envelope_id,
            channel_id = channel_id.unwrap_or("unknown"),
            thread_id = thread_id.unwrap_or("unknown"),
            "received slack envelope"
        );

        if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
            warn!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                error = %error,
                "failed to acknowledge slack envelope"
            );
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged slack envelope"
            );
        }

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        let reply = match self.dispatcher.dispatch(envelope, &context).await {
            Ok(HandlerResult::Responded(reply)) => reply,
            Ok(outcome) => {
                debug!(correlation_id = %envelope.envelope_id, outcome = ?outcome, "envelope handled");
                return;
            }
            Err(error) => {
                warn!(
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "event dispatch failed; continuing socket loop"
                );
                return;
            }
        };

        match self.poster.post_message(&reply).await {
            Ok(()) => info!(
                event_name = "egress.slack.reply_posted",
                correlation_id = %envelope.envelope_id,
                channel_id = %reply.channel,
                "posted reply"
            ),
            Err(error) => warn!(
                event_name = "egress.slack.reply_failed",
                correlation_id = %envelope.envelope_id,
                channel_id = %reply.channel,
                error = %error,
                "failed to post reply; continuing socket loop"
            ),
        }
    }
}

fn correlation_fields(envelope: &SlackEnvelope) -> (Option<&str>, Option<&str>) {
    match &envelope.event {
        SlackEvent::AppMention(event) => (
            Some(event.channel_id.as_str()),
            Some(event.thread_ts.as_deref().unwrap_or(event.ts.as_str())),
        ),
        SlackEvent::Unsupported { .. } => (None, None),
    }
}
