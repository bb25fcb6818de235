//! Spawn-and-pipe transport.
//!
//! Owns one child process per backend and speaks line-delimited JSON-RPC on
//! its stdin/stdout (one JSON object per line). Server stderr is forwarded
//! to the log; the last lines are kept for error messages.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::{self, next_request_id, RpcChannel, Transport};
use super::types::{Invocation, InvocationResult};
use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ResourceContents, ResourceDescriptor,
    ToolDescriptor,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Servers that load heavy dependencies at import time need the headroom.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for stderr to drain after a failed start.
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Stderr lines retained for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Cap on the stderr excerpt attached to errors.
const STDERR_EXCERPT_CHARS: usize = 2000;

// ─── Pipe ────────────────────────────────────────────────────────────────────

/// A running server process and its captured stdio.
struct Pipe {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

/// The pipe slot for one exchange. Dropped while the request line is only
/// partly written (the caller gave up on the future), it kills the pipe so
/// no later request is glued onto the fragment.
struct InFlight<'a> {
    slot: MutexGuard<'a, Option<Pipe>>,
    writing: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.writing {
            return;
        }
        if let Some(mut pipe) = self.slot.take() {
            tracing::warn!(pid = ?pipe.child.id(), "request abandoned mid-write, dropping pipe");
            let _ = pipe.child.start_kill();
        }
    }
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    backend: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<String>,
    /// Held for the whole request/response exchange: one in-flight request per pipe.
    pipe: Mutex<Option<Pipe>>,
    /// Serializes `connect()` so two callers never spawn twice.
    connect_lock: Mutex<()>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
}

impl StdioTransport {
    pub fn new(
        backend: &str,
        command: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<String>,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            command: command.to_string(),
            args,
            env,
            cwd,
            pipe: Mutex::new(None),
            connect_lock: Mutex::new(()),
            stderr_tail: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    fn connection_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Connection {
            backend: self.backend.clone(),
            reason: reason.into(),
        }
    }

    fn spawn(&self) -> Result<Pipe, McpError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.envs(&self.env);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            #[allow(unused_imports)]
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.connection_error(format!("failed to spawn `{}`: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.connection_error("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.connection_error("failed to capture stdout"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| forward_stderr(&self.backend, stderr, Arc::clone(&self.stderr_tail)));

        tracing::info!(
            backend = %self.backend,
            command = %self.command,
            pid = ?child.id(),
            "spawned tool server"
        );

        Ok(Pipe {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_task,
        })
    }

    /// Tear down a pipe that failed to start, waiting briefly so its stderr
    /// is fully captured before the excerpt is taken.
    async fn discard_failed(&self, mut pipe: Pipe) -> String {
        let _ = pipe.child.start_kill();
        let _ = tokio::time::timeout(STDERR_GRACE, pipe.child.wait()).await;
        if let Some(task) = pipe.stderr_task.take() {
            let _ = tokio::time::timeout(STDERR_GRACE, task).await;
        }
        self.stderr_excerpt()
    }

    fn stderr_excerpt(&self) -> String {
        let Ok(tail) = self.stderr_tail.lock() else {
            return String::new();
        };
        let mut text = tail.iter().cloned().collect::<Vec<_>>().join("\n");
        if text.len() > STDERR_EXCERPT_CHARS {
            let mut cut = STDERR_EXCERPT_CHARS;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...(truncated)");
        }
        text
    }

    async fn write_line(&self, pipe: &mut Pipe, line: &str) -> Result<(), McpError> {
        pipe.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.connection_error(format!("failed to write to stdin: {e}")))?;
        pipe.stdin
            .flush()
            .await
            .map_err(|e| self.connection_error(format!("failed to flush stdin: {e}")))
    }

    /// Read lines until the response with `id`. Cancelling here is safe:
    /// a late reply is skipped by id on the next exchange.
    async fn read_response(&self, pipe: &mut Pipe, id: u64) -> Result<JsonRpcResponse, McpError> {
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = pipe
                .stdout
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.connection_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.connection_error(format!(
                    "server stdout closed (process may have exited){}",
                    format_stderr_suffix(&self.stderr_excerpt())
                )));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.answers(id) => return Ok(resp),
                Ok(resp) => {
                    // Stale reply to an abandoned request, or a server push.
                    tracing::trace!(backend = %self.backend, id = ?resp.id, "skipping unrelated message");
                }
                Err(_) => {
                    tracing::debug!(backend = %self.backend, line = %trimmed, "skipping non-JSON stdout line");
                }
            }
        }
    }
}

#[async_trait]
impl RpcChannel for StdioTransport {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&req).map_err(|e| McpError::TransportProtocol {
            backend: self.backend.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        line.push('\n');

        let mut guard = self.pipe.lock().await;

        let exited = match guard.as_mut() {
            None => return Err(self.connection_error("not connected")),
            Some(pipe) => pipe.child.try_wait().unwrap_or(None),
        };
        if let Some(status) = exited {
            *guard = None;
            return Err(self.connection_error(format!(
                "server process exited ({status}){}",
                format_stderr_suffix(&self.stderr_excerpt())
            )));
        }

        let mut in_flight = InFlight {
            slot: guard,
            writing: true,
        };
        let Some(pipe) = in_flight.slot.as_mut() else {
            return Err(self.connection_error("not connected"));
        };
        let result = match self.write_line(pipe, &line).await {
            Ok(()) => {
                in_flight.writing = false;
                self.read_response(pipe, id).await
            }
            Err(e) => Err(e),
        };

        // A broken pipe is not coming back; drop it so the next call fails fast.
        if matches!(result, Err(McpError::Connection { .. })) {
            if let Some(mut dead) = in_flight.slot.take() {
                let _ = dead.child.start_kill();
            }
        }
        result
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let mut line =
            serde_json::to_string(&notification).map_err(|e| McpError::TransportProtocol {
                backend: self.backend.clone(),
                reason: format!("failed to serialize notification: {e}"),
            })?;
        line.push('\n');

        let mut in_flight = InFlight {
            slot: self.pipe.lock().await,
            writing: true,
        };
        let pipe = in_flight
            .slot
            .as_mut()
            .ok_or_else(|| self.connection_error("not connected"))?;
        let written = self.write_line(pipe, &line).await;
        if written.is_ok() {
            in_flight.writing = false;
        }
        written
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn connect(&self) -> Result<(), McpError> {
        let _connecting = self.connect_lock.lock().await;

        {
            let mut guard = self.pipe.lock().await;
            if let Some(pipe) = guard.as_mut() {
                if matches!(pipe.child.try_wait(), Ok(None)) {
                    return Ok(());
                }
                *guard = None;
            }
            if let Ok(mut tail) = self.stderr_tail.lock() {
                tail.clear();
            }
            *guard = Some(self.spawn()?);
        }

        let outcome = tokio::time::timeout(INIT_TIMEOUT, transport::handshake(self)).await;
        let failure = match outcome {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
        };

        let stderr_ctx = match self.pipe.lock().await.take() {
            Some(pipe) => self.discard_failed(pipe).await,
            None => self.stderr_excerpt(),
        };
        if !stderr_ctx.is_empty() {
            tracing::warn!(
                backend = %self.backend,
                stderr = %stderr_ctx,
                "server stderr captured on failure"
            );
        }
        Err(self.connection_error(format!(
            "handshake failed: {failure}{}",
            format_stderr_suffix(&stderr_ctx)
        )))
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        transport::list_all_tools(self).await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        transport::list_all_resources(self).await
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError> {
        transport::read_resource(self, uri).await
    }

    async fn call(&self, invocation: &Invocation) -> InvocationResult {
        transport::call_tool(self, invocation).await
    }

    /// Close stdin, give the server a moment to exit, then kill and reap it.
    async fn close(&self) -> Result<(), McpError> {
        let Some(pipe) = self.pipe.lock().await.take() else {
            return Ok(());
        };
        let Pipe {
            mut child,
            stdin,
            stdout,
            stderr_task,
        } = pipe;
        drop(stdin);
        drop(stdout);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(backend = %self.backend, %status, "tool server exited");
            }
            _ => {
                tracing::warn!(backend = %self.backend, "tool server did not exit in time, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| self.connection_error(format!("failed to kill server: {e}")))?;
            }
        }
        if let Some(task) = stderr_task {
            task.abort();
        }
        Ok(())
    }
}

// ─── Stderr ──────────────────────────────────────────────────────────────────

/// Forward each stderr line to the log and keep the most recent ones.
fn forward_stderr(
    backend: &str,
    stderr: ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    let backend = backend.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(backend = %backend, "server stderr: {line}");
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    })
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
