//! Stdio transport: downstream server as a child process.
//!
//! Frames are JSON-RPC messages, one JSON object per line, written to the
//! child's stdin and read from its stdout. The child's stderr is drained
//! into the wrapper's log so a misbehaving server cannot block on a full
//! pipe, and so its diagnostics stay visible without touching the protocol
//! stream.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use warden_types::errors::WardenError;
use warden_types::protocol::JsonRpcMessage;
use warden_types::traits::McpTransport;

/// Transport to a child-process MCP server over stdin/stdout.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    child: Mutex<Child>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn `command` (whitespace-separated program and arguments) and wire
    /// up the protocol streams.
    pub async fn spawn(command: &str) -> Result<Self, WardenError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| WardenError::Config("stdio command must not be empty".to_string()))?;

        info!(command = command, "spawning downstream server");
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::Unavailable(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WardenError::Transport("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WardenError::Transport("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WardenError::Transport("child stderr not captured".to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, incoming) = mpsc::unbounded_channel();

        // Reader task: one JSON object per stdout line. EOF means the child
        // is gone; dropping `tx` wakes any blocked `recv`.
        let reader_connected = connected.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(line) {
                            Ok(message) => {
                                if tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "discarding malformed frame from downstream stdout");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading downstream stdout");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            debug!("downstream stdout closed");
        });

        // Stderr drain: keep the child from blocking, surface its output.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "downstream stderr");
            }
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            incoming: Mutex::new(incoming),
            child: Mutex::new(child),
            connected,
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), WardenError> {
        if !self.is_connected() {
            return Err(WardenError::Unavailable(
                "downstream process has exited".to_string(),
            ));
        }
        let mut frame = serde_json::to_string(&message)?;
        frame.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(frame.as_bytes()).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            WardenError::Transport(format!("failed to write to downstream stdin: {e}"))
        })?;
        stdin.flush().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            WardenError::Transport(format!("failed to flush downstream stdin: {e}"))
        })
    }

    async fn recv(&self) -> Result<JsonRpcMessage, WardenError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| WardenError::Unavailable("downstream process closed its stdout".to_string()))
    }

    async fn close(&self) -> Result<(), WardenError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "downstream child already gone on close");
        }
        info!("stdio transport closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
