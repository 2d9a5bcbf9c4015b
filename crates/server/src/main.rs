use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tinyrelay_core::{
    config::{AppConfig, ConfigError, LoadOptions, RunMode},
    Classified, ErrorClass,
};
use tinyrelay_server::{bootstrap_with_config, run_interactive, telemetry, BootstrapError};
use tinyrelay_slack::SocketError;
use tokio::io::BufReader;

#[derive(Debug, Parser)]
#[command(
    name = "tinyrelay",
    about = "Relay Slack mentions to a hosted analytics agent",
    long_about = "Answers @-mentions of the bot in Slack with a hosted agent that can query a \
                  remote MCP connector. Use --interactive to talk to the agent from a terminal.",
    after_help = "Examples:\n  tinyrelay\n  tinyrelay --interactive"
)]
struct Cli {
    #[arg(short = 'i', long, help = "Chat with the agent on stdin/stdout instead of Slack")]
    interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("tinyrelay: ignoring unreadable .env file: {error}");
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let class = error_class(&error);
            eprintln!("tinyrelay: {error:#}");
            ExitCode::from(class.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mode = if cli.interactive { RunMode::Interactive } else { RunMode::Events };

    // Config must load before logging exists, so its failures go to stderr only.
    let config = AppConfig::load(LoadOptions { mode, ..LoadOptions::default() })?;
    telemetry::init_logging(&config.logging);

    let app = bootstrap_with_config(config)?;

    match mode {
        RunMode::Interactive => {
            let mut stdout = tokio::io::stdout();
            let turns = run_interactive(
                &app.agent_runtime,
                BufReader::new(tokio::io::stdin()),
                &mut stdout,
            )
            .await
            .context("terminal i/o failed")?;
            tracing::info!(event_name = "system.interactive.stopped", turns, "interactive relay ended");
        }
        RunMode::Events => {
            let runner = app.event_relay().await?;
            tracing::info!(
                event_name = "system.server.started",
                correlation_id = "bootstrap",
                "tinyrelay listening for slack mentions"
            );

            tokio::select! {
                outcome = runner.run() => outcome?,
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for ctrl-c")?;
                    tracing::info!(
                        event_name = "system.server.stopping",
                        correlation_id = "shutdown",
                        "tinyrelay stopping"
                    );
                }
            }
        }
    }

    Ok(())
}

fn error_class(error: &anyhow::Error) -> ErrorClass {
    if let Some(error) = error.downcast_ref::<ConfigError>() {
        return error.class();
    }
    if let Some(error) = error.downcast_ref::<BootstrapError>() {
        return error.class();
    }
    if let Some(error) = error.downcast_ref::<SocketError>() {
        return error.class();
    }
    ErrorClass::Transport
}
