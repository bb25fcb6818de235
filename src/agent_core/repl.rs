//! Line-oriented chat front end for the agent loop.
//!
//! Reads a line, runs a turn, prints the reply. `exit` / `quit` end the
//! session; an interrupt while waiting for input or during a turn ends it
//! too. Recoverable policy errors are printed as `[Error] …` and the loop
//! goes on.

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::agent_loop::Agent;
use super::errors::AgentError;
use crate::mcp_client::MultiServerClient;

const BANNER: &str = "\n===== Interactive MCP Chat =====\n\
                      Type 'exit' or 'quit' to end the conversation\n\
                      ==================================\n";

/// Why the REPL returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// The user typed an exit token.
    UserExit,
    /// Input reached EOF.
    EndOfInput,
    /// The interrupt future resolved.
    Interrupted,
}

fn is_exit_command(line: &str) -> bool {
    let token = line.trim();
    token.eq_ignore_ascii_case("exit") || token.eq_ignore_ascii_case("quit")
}

async fn write<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<(), AgentError> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Drive `agent` from `input` until exit, EOF, interrupt or an
/// unrecoverable error.
pub async fn run_repl<R, W, I>(
    agent: &mut Agent,
    input: R,
    mut output: W,
    interrupt: I,
) -> Result<ReplExit, AgentError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut lines = input.lines();

    write(&mut output, BANNER).await?;

    loop {
        write(&mut output, "\nYou: ").await?;

        let line = tokio::select! {
            _ = &mut interrupt => {
                write(&mut output, "\nConversation interrupted. Exiting...\n").await?;
                return Ok(ReplExit::Interrupted);
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            write(&mut output, "\nEnding conversation...\n").await?;
            return Ok(ReplExit::EndOfInput);
        };
        if line.trim().is_empty() {
            continue;
        }
        if is_exit_command(&line) {
            write(&mut output, "Ending conversation...\n").await?;
            return Ok(ReplExit::UserExit);
        }

        write(&mut output, "\nAssistant: ").await?;

        let outcome = tokio::select! {
            _ = &mut interrupt => {
                write(&mut output, "\nConversation interrupted. Exiting...\n").await?;
                return Ok(ReplExit::Interrupted);
            }
            outcome = agent.run_turn(line.trim()) => outcome,
        };

        match outcome {
            Ok(turn) => write(&mut output, &format!("{}\n", turn.reply)).await?,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "turn failed");
                write(&mut output, &format!("\n[Error] {e}\n")).await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "unrecoverable error, ending session");
                write(&mut output, &format!("\n[Error] {e}\n")).await?;
                return Err(e);
            }
        }
    }
}

/// Run the REPL, then shut the client down however the REPL ended.
pub async fn run_chat<R, W, I>(
    mut agent: Agent,
    client: &MultiServerClient,
    input: R,
    output: W,
    interrupt: I,
) -> Result<ReplExit, AgentError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: Future<Output = ()>,
{
    let result = run_repl(&mut agent, input, output, interrupt).await;
    agent.terminate();

    let failures = client.shutdown().await;
    for failure in &failures {
        tracing::warn!(backend = %failure.backend, error = %failure.error, "backend did not close cleanly");
    }
    tracing::info!(
        exit = ?result.as_ref().ok(),
        turns = agent.conversation().user_turns(),
        close_failures = failures.len(),
        "chat session ended"
    );
    result
}

// ─── Tests ──────────────────────────────────────────────────────────────────
