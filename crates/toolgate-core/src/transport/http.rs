//! HTTP channel — JSON-RPC over a persistent HTTP session.
//!
//! One reqwest client per channel, with the provider's configured headers
//! applied to every request. Providers that hand back a session id header
//! on initialize get it echoed on subsequent calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{parse_capabilities, parse_invoke_reply, Capability, ChannelError, InvokeResult, ProviderChannel, RpcReply};
use crate::provider::ProviderDescriptor;

/// Handshake timeout for the initial `initialize` exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Session id header used by streamable-HTTP tool servers.
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A persistent HTTP session to one capability provider.
pub struct HttpChannel {
    client: reqwest::Client,
    url: String,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
    provider_name: String,
}

impl HttpChannel {
    /// Open the session and complete the initialize handshake.
    pub async fn open(descriptor: &ProviderDescriptor) -> Result<Self, ChannelError> {
        let url = descriptor.url.as_deref().ok_or_else(|| {
            ChannelError::Fatal(format!(
                "Provider '{}' has http transport but no url",
                descriptor.name
            ))
        })?;

        let mut headers = reqwest::header::HeaderMap::new();
        // Tool servers require Accept for both JSON and event-stream replies
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json, text/event-stream"),
        );
        if let Some(extra) = &descriptor.headers {
            for (key, value) in extra {
                let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| ChannelError::Fatal(format!("Invalid header name: {}", e)))?;
                let value = reqwest::header::HeaderValue::from_str(value)
                    .map_err(|e| ChannelError::Fatal(format!("Invalid header value: {}", e)))?;
                headers.insert(name, value);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ChannelError::Fatal(format!("Failed to build HTTP client: {}", e)))?;

        let channel = Self {
            client,
            url: url.to_string(),
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
            provider_name: descriptor.name.clone(),
        };

        match channel
            .request("initialize", serde_json::json!({
                "protocolVersion": "2025-03-26",
                "clientInfo": { "name": "toolgate", "version": env!("CARGO_PKG_VERSION") }
            }), HANDSHAKE_TIMEOUT)
            .await?
        {
            RpcReply::Result(_) => {}
            RpcReply::Error { code, message } => {
                return Err(ChannelError::Fatal(format!(
                    "initialize rejected [{}]: {}",
                    code, message
                )));
            }
        }

        tracing::info!("[HttpChannel:{}] Session open: {}", channel.provider_name, channel.url);
        Ok(channel)
    }

    /// POST one JSON-RPC request and parse the reply.
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcReply, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut req = self.client.post(&self.url).timeout(timeout).json(&body);
        if let Some(session) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, session);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ChannelError::Timeout(format!("Timeout waiting for {} ({}ms)", method, timeout.as_millis()))
            } else {
                ChannelError::Fatal(format!("HTTP request failed for {}: {}", method, e))
            }
        })?;

        // Capture the session id the provider assigned, if any
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.write().await;
            if slot.as_deref() != Some(session) {
                *slot = Some(session.to_string());
            }
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::Fatal(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Ok(RpcReply::Error {
                code: status.as_u16() as i64,
                message: format!("HTTP {}: {}", status, &text[..text.len().min(500)]),
            });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ChannelError::Fatal(format!("Invalid JSON-RPC response: {}", e)))?;

        if let Some(error) = json.get("error") {
            return Ok(RpcReply::Error {
                code: error["code"].as_i64().unwrap_or(0),
                message: error["message"].as_str().unwrap_or("unknown error").to_string(),
            });
        }

        Ok(RpcReply::Result(json.get("result").cloned().unwrap_or(Value::Null)))
    }
}

#[async_trait::async_trait]
impl ProviderChannel for HttpChannel {
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
        // HTTP sessions have no standing process to die; failures surface
        // per-request.
        true
    }

    async fn close(&self) {
        let mut slot = self.session_id.write().await;
        if slot.take().is_some() {
            tracing::debug!("[HttpChannel:{}] Session closed", self.provider_name);
        }
    }
}
