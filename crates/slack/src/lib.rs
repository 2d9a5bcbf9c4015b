//! Slack Integration - Socket Mode mention relay interface
//!
//! This crate provides the Slack side of tinyrelay:
//! - **Socket Mode** (`socket`) - WebSocket connection to Slack (no public URL needed)
//! - **Events** (`events`) - Decoding of Socket Mode frames and mention dispatch
//! - **Mentions** (`mention`) - Bot identity, mention detection and stripping
//! - **Web API** (`web`) - `auth.test`, `apps.connections.open`, `chat.postMessage`
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Enable Socket Mode and subscribe to the `app_mention` bot event
//! 3. Grant the `app_mentions:read` and `chat:write` scopes
//! 4. Set env vars: `SLACK_APP_TOKEN`, `SLACK_BOT_TOKEN`
//!
//! # Architecture
//!
//! ```text
//! Socket Mode frame → decode → EventDispatcher → AppMentionHandler → MentionService
//!                                                                       ↓
//!                                  chat.postMessage ← SocketModeRunner ← reply
//! ```
//!
//! # Key Types
//!
//! - `SocketModeRunner` - Sequential event loop with reconnection logic
//! - `EventDispatcher` - Routes decoded events to handlers
//! - `MentionService` - Trait the relay implements to answer a mention
//! - `SlackWebClient` - Web API calls authenticated with the bot or app token

pub mod events;
pub mod mention;
pub mod socket;
pub mod web;

pub use events::{AppMentionHandler, EventContext, EventDispatcher, EventHandlerError, MentionService};
pub use mention::BotIdentity;
pub use socket::{ReconnectPolicy, SocketError, SocketModeRunner, WebSocketTransport};
pub use web::{escape_text, MessagePoster, OutboundMessage, SlackWebClient, WebApiError};
