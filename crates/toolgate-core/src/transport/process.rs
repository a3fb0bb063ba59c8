//! Process channel — one provider child process, JSON-RPC over stdio.
//!
//! Lifecycle:
//!   1. `spawn(descriptor)` — start the child, launch a background stdout reader
//!   2. `list_capabilities()` — send "tools/list"
//!   3. `invoke(name, args)`  — send "tools/call", bounded by the caller's timeout
//!   4. `close()`             — terminate the process, reject pending requests
//!
//! Requests carry a monotonically increasing id; the background reader
//! resolves them through a pending-request map. Non-JSON stdout lines are
//! logged and skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};

use super::{parse_capabilities, parse_invoke_reply, Capability, ChannelError, InvokeResult, ProviderChannel, RpcReply};
use crate::provider::ProviderDescriptor;

/// Handshake timeout for the initial `initialize` exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>>;

/// A managed provider child process.
pub struct ProcessChannel {
    stdin: Arc<Mutex<ChildStdin>>,
    child: Arc<Mutex<Option<Child>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    provider_name: String,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl ProcessChannel {
    /// Spawn the provider process and complete the initialize handshake.
    pub async fn spawn(descriptor: &ProviderDescriptor) -> Result<Self, ChannelError> {
        let command = descriptor.command.as_deref().ok_or_else(|| {
            ChannelError::Fatal(format!(
                "Provider '{}' has stdio transport but no command",
                descriptor.name
            ))
        })?;
        let args: Vec<&str> = descriptor
            .args
            .as_ref()
            .map(|a| a.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();

        tracing::info!(
            "[ProcessChannel:{}] Spawning: {} {}",
            descriptor.name,
            command,
            args.join(" "),
        );

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &descriptor.env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ChannelError::Fatal(format!(
                "Failed to spawn '{}': {}. Is it installed and in PATH?",
                command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::Fatal("No stdin on child process".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::Fatal("No stdout on child process".to_string()))?;
        let stderr = child.stderr.take();

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let name = descriptor.name.clone();

        // Log stderr in the background
        if let Some(stderr) = stderr {
            let name_clone = name.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!("[ProcessChannel:{} stderr] {}", name_clone, line);
                    }
                }
            });
        }

        // Background stdout reader — resolves pending requests
        let alive_clone = alive.clone();
        let pending_clone = pending.clone();
        let name_clone = name.clone();

        let reader_handle = tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let msg: Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::debug!(
                            "[ProcessChannel:{}] Non-JSON stdout: {}",
                            name_clone,
                            &line[..line.len().min(200)]
                        );
                        continue;
                    }
                };

                let has_id = msg.get("id").map(|v| !v.is_null()).unwrap_or(false);
                let has_result = msg.get("result").is_some();
                let has_error = msg.get("error").is_some();

                if has_id && (has_result || has_error) {
                    let id = msg["id"].as_u64().unwrap_or(0);
                    let mut map = pending_clone.lock().await;
                    if let Some(tx) = map.remove(&id) {
                        let reply = if has_error {
                            RpcReply::Error {
                                code: msg["error"]["code"].as_i64().unwrap_or(0),
                                message: msg["error"]["message"]
                                    .as_str()
                                    .unwrap_or("unknown error")
                                    .to_string(),
                            }
                        } else {
                            RpcReply::Result(msg["result"].clone())
                        };
                        let _ = tx.send(reply);
                    }
                } else {
                    // Notifications and anything else are ignored on this channel
                    tracing::debug!(
                        "[ProcessChannel:{}] Unhandled message: {}",
                        name_clone,
                        &line[..line.len().min(200)]
                    );
                }
            }

            alive_clone.store(false, Ordering::SeqCst);
            tracing::info!("[ProcessChannel:{}] stdout reader finished", name_clone);
        });

        let channel = Self {
            stdin: Arc::new(Mutex::new(stdin)),
            child: Arc::new(Mutex::new(Some(child))),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            provider_name: name,
            _reader_handle: reader_handle,
        };

        // Handshake: a provider that cannot answer initialize is unusable
        match channel
            .request("initialize", serde_json::json!({
                "protocolVersion": "2025-03-26",
                "clientInfo": { "name": "toolgate", "version": env!("CARGO_PKG_VERSION") }
            }), HANDSHAKE_TIMEOUT)
            .await?
        {
            RpcReply::Result(_) => {}
            RpcReply::Error { code, message } => {
                channel.close().await;
                return Err(ChannelError::Fatal(format!(
                    "initialize rejected [{}]: {}",
                    code, message
                )));
            }
        }

        tracing::info!("[ProcessChannel:{}] Ready", channel.provider_name);
        Ok(channel)
    }

    /// Send a JSON-RPC request and wait for the reply.
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcReply, ChannelError> {
        if !self.is_alive() {
            return Err(ChannelError::Fatal(format!(
                "Provider '{}' process is not alive",
                self.provider_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let data = format!("{}\n", msg);

        {
            let mut stdin = self.stdin.lock().await;
            let write = async {
                stdin.write_all(data.as_bytes()).await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                self.pending.lock().await.remove(&id);
                return Err(ChannelError::Fatal(format!("Write {}: {}", method, e)));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ChannelError::Fatal(format!(
                "Channel closed for {} (id={})",
                method, id
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ChannelError::Timeout(format!(
                    "Timeout waiting for {} (id={}, {}ms)",
                    method,
                    id,
                    timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl ProviderChannel for ProcessChannel {
    async fn list_capabilities(&self, timeout: Duration) -> Result<Vec<Capability>, ChannelError> {
        match self.request("tools/list", serde_json::json!({}), timeout).await? {
            RpcReply::Result(result) => parse_capabilities(&result),
            RpcReply::Error { code, message } => Err(ChannelError::Fatal(format!(
                "tools/list rejected [{}]: {}",
                code, message
            ))),
        }
    }

    async fn invoke(
        &self,
        capability: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<InvokeResult, ChannelError> {
        let reply = self
            .request(
                "tools/call",
                serde_json::json!({ "name": capability, "arguments": args }),
                timeout,
            )
            .await?;
        Ok(parse_invoke_reply(reply))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            tracing::info!("[ProcessChannel:{}] Killing process", self.provider_name);
            let _ = child.kill().await;
        }
        // Dropping the senders rejects all pending requests
        self.pending.lock().await.clear();
    }
}
