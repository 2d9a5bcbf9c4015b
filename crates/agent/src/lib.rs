//! Agent client - the seam to the hosted reasoning service
//!
//! The relay never reasons, plans, or runs SQL itself. Every prompt is handed to
//! a hosted agent together with a [`ConnectorDescriptor`] naming the remote MCP
//! server the agent may query while it works.
//!
//! # Key Types
//!
//! - `AgentClient` - Pluggable trait over the hosted service (see `llm`)
//! - `OpenAiAgentClient` - Responses API client with a remote MCP tool
//! - `AgentRuntime` - Binds the process-wide connector and enforces prompt preconditions
//! - `AgentReply` - A complete answer or a lazy, single-use fragment stream
//!
//! # Failure Model
//!
//! Calls are never retried here. Each failure surfaces as a distinguishable
//! [`AgentError`] so the relay can decide how to report it.

pub mod error;
pub mod llm;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod openai;
pub mod runtime;

pub use error::AgentError;
pub use llm::{AgentClient, ConnectorDescriptor, ReplyStream};
pub use openai::OpenAiAgentClient;
pub use runtime::{AgentReply, AgentRuntime, ReplyMode};
