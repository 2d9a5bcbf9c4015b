//! The `tinyrelay` executable's building blocks: startup, the Slack mention
//! relay, and the terminal loop used for manual testing.

pub mod bootstrap;
pub mod interactive;
pub mod relay;
pub mod telemetry;

pub use bootstrap::{bootstrap_with_client, bootstrap_with_config, Application, BootstrapError};
pub use interactive::run_interactive;
pub use relay::MentionRelay;
