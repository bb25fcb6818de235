//! Serve a registry over stdin/stdout, one JSON-RPC message per line.
//!
//! Stdout carries protocol traffic only; logs go to stderr.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::dispatch::Dispatcher;

/// Serve until stdin reaches EOF.
pub async fn serve_stdio(dispatcher: Dispatcher) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_lines(dispatcher, stdin, stdout).await
}

/// Serve line-delimited JSON-RPC over any reader/writer pair.
///
/// Requests are handled in arrival order; each response is flushed before
/// the next line is read.
pub async fn serve_lines<R, W>(dispatcher: Dispatcher, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(
        server = %dispatcher.registry().name(),
        tools = dispatcher.registry().list_tools().len(),
        "serving on stdio"
    );

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(mut response) = dispatcher.handle_line(trimmed).await {
            response.push('\n');
            writer.write_all(response.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    tracing::info!(server = %dispatcher.registry().name(), "stdin closed, exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_server::registry::{ServerRegistry, ToolEntry, ToolOutput};

    #[tokio::test]
    async fn test_one_response_per_request_line() {
        let registry = ServerRegistry::new("demo").with_tool(ToolEntry::sync(
            "hello",
            "",
            Vec::new(),
            |_| Ok(ToolOutput::text("hi")),
        ));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"hello"}}"#,
            "\n",
        );
        let mut output = Vec::new();
        serve_lines(Dispatcher::new(registry), input.as_bytes(), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
        assert_eq!(lines[1]["result"]["content"][0]["text"], "hi");
    }
}
