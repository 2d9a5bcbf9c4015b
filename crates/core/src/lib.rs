//! Shared building blocks for the relay: immutable configuration, the error
//! taxonomy, and the transient inbound message type.

pub mod config;
pub mod errors;
pub mod message;

pub use config::{AppConfig, ConfigError, LoadOptions, RunMode};
pub use errors::{Classified, ErrorClass};
pub use message::IncomingMessage;
