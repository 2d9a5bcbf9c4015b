use futures::StreamExt;
use tinyrelay_agent::{AgentError, AgentReply, AgentRuntime, ReplyMode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const PROMPT_MARKER: &str = "> ";

fn is_quit(line: &str) -> bool {
    line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit")
}

/// Read-process-print loop over any line source and sink. Answers are streamed
/// fragment by fragment and flushed as they arrive. Returns the number of
/// prompts sent to the agent.
pub async fn run_interactive<R, W>(
    runtime: &AgentRuntime,
    input: R,
    output: &mut W,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut turns = 0;

    loop {
        output.write_all(PROMPT_MARKER.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            output.flush().await?;
            break;
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if is_quit(prompt) {
            break;
        }

        turns += 1;
        match runtime.ask(prompt, ReplyMode::Streaming).await {
            Ok(AgentReply::Streaming(mut fragments)) => {
                while let Some(fragment) = fragments.next().await {
                    match fragment {
                        Ok(text) => {
                            output.write_all(text.as_bytes()).await?;
                            output.flush().await?;
                        }
                        Err(error) => {
                            write_error(output, &error).await?;
                            break;
                        }
                    }
                }
            }
            Ok(AgentReply::Complete(text)) => output.write_all(text.as_bytes()).await?,
            Err(error) => write_error(output, &error).await?,
        }

        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    Ok(turns)
}

async fn write_error<W>(output: &mut W, error: &AgentError) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!(error_kind = error.kind(), error = %error, "interactive turn failed");
    output.write_all(format!("[error: {error}]").as_bytes()).await?;
    output.flush().await
}
