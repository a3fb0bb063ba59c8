//! Transport adapters — concrete channels to capability providers.
//!
//! A channel speaks one provider's wire protocol: either line-delimited
//! JSON-RPC over a child process's stdio pipes, or JSON-RPC over a
//! persistent HTTP session. The wire details stay entirely inside this
//! module; the pool and engine only see [`ProviderChannel`].

pub mod http;
pub mod process;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ProviderDescriptor, TransportKind};

pub use http::HttpChannel;
pub use process::ProcessChannel;

/// One named operation a provider supports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Outcome of one capability invocation.
///
/// A provider's definitive tool-level failure is a *successful* transport
/// exchange carrying `is_error = true`; only transport faults are `Err`
/// at this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl InvokeResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn tool_error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}

/// Transport-level failure.
///
/// `Fatal` means the channel is unusable (dead process, lost handshake)
/// and the owning connection must be evicted. `Timeout` abandons one
/// request; the channel itself may still be healthy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("{0}")]
    Fatal(String),
    #[error("{0}")]
    Timeout(String),
}

/// Reply to one JSON-RPC request: either a result payload or the
/// provider's own error object.
#[derive(Debug, Clone)]
pub(crate) enum RpcReply {
    Result(Value),
    Error { code: i64, message: String },
}

/// A live channel to one capability provider.
#[async_trait::async_trait]
pub trait ProviderChannel: Send + Sync {
    /// Fetch the provider's capability manifest.
    async fn list_capabilities(&self, timeout: Duration) -> Result<Vec<Capability>, ChannelError>;

    /// Invoke one capability. Tool-level failures come back as
    /// `Ok(InvokeResult { is_error: true, .. })`.
    async fn invoke(
        &self,
        capability: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<InvokeResult, ChannelError>;

    /// Whether the underlying channel is still usable.
    fn is_alive(&self) -> bool;

    /// Tear the channel down. Idempotent.
    async fn close(&self);
}

/// Factory seam: opens a concrete channel for a provider descriptor.
///
/// The pool depends on this trait so tests can substitute scripted
/// channels for real processes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderChannel>, ChannelError>;
}

/// Default transport: spawns a child process for stdio providers, opens
/// a persistent HTTP session for http providers.
pub struct StdTransport;

#[async_trait::async_trait]
impl Transport for StdTransport {
    async fn open(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderChannel>, ChannelError> {
        match descriptor.transport {
            TransportKind::Stdio => {
                let channel = ProcessChannel::spawn(descriptor).await?;
                Ok(Box::new(channel))
            }
            TransportKind::Http => {
                let channel = HttpChannel::open(descriptor).await?;
                Ok(Box::new(channel))
            }
        }
    }
}

/// Parse a `tools/list` result payload into a capability manifest.
pub(crate) fn parse_capabilities(result: &Value) -> Result<Vec<Capability>, ChannelError> {
    let tools = result
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ChannelError::Fatal("No tools array in tools/list response".to_string()))?;

    tools
        .iter()
        .map(|t| {
            serde_json::from_value(t.clone())
                .map_err(|e| ChannelError::Fatal(format!("Malformed tool entry: {}", e)))
        })
        .collect()
}

/// Interpret a `tools/call` reply as an invocation outcome.
pub(crate) fn parse_invoke_reply(reply: RpcReply) -> InvokeResult {
    match reply {
        RpcReply::Result(result) => {
            let is_error = result
                .get("isError")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let content = result.get("content").cloned().unwrap_or(result);
            InvokeResult { content, is_error }
        }
        RpcReply::Error { code, message } => InvokeResult::tool_error(serde_json::json!({
            "code": code,
            "message": message,
        })),
    }
}
