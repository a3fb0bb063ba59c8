//! Scripted transport for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{Capability, ChannelError, InvokeResult, ProviderChannel, Transport};
use crate::provider::ProviderDescriptor;

type InvokeFn =
    dyn Fn(&str, &str, &Value) -> Result<InvokeResult, ChannelError> + Send + Sync;

struct Shared {
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_open: Mutex<HashSet<String>>,
    invoke_delay: Mutex<Option<Duration>>,
    invoke_fn: Mutex<Arc<InvokeFn>>,
    invocations: Mutex<Vec<(String, String)>>,
}

/// Transport whose channels answer from a scripted closure instead of a
/// live provider.
#[derive(Clone)]
pub(crate) struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                fail_open: Mutex::new(HashSet::new()),
                invoke_delay: Mutex::new(None),
                invoke_fn: Mutex::new(Arc::new(|provider, capability, args| {
                    Ok(InvokeResult::ok(serde_json::json!({
                        "provider": provider,
                        "capability": capability,
                        "args": args,
                    })))
                })),
                invocations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the scripted invoke behavior.
    pub fn set_invoke<F>(&self, f: F)
    where
        F: Fn(&str, &str, &Value) -> Result<InvokeResult, ChannelError> + Send + Sync + 'static,
    {
        *self.shared.invoke_fn.lock().unwrap() = Arc::new(f);
    }

    /// Make `open()` fail for the named provider.
    pub fn fail_open(&self, provider: &str) {
        self.shared.fail_open.lock().unwrap().insert(provider.to_string());
    }

    /// Delay every invocation (for Busy-state and cancellation tests).
    pub fn set_invoke_delay(&self, delay: Duration) {
        *self.shared.invoke_delay.lock().unwrap() = Some(delay);
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// (provider, capability) pairs, in invocation order.
    pub fn invocations(&self) -> Vec<(String, String)> {
        self.shared.invocations.lock().unwrap().clone()
    }
}

struct MockChannel {
    provider: String,
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Box<dyn ProviderChannel>, ChannelError> {
        if self.shared.fail_open.lock().unwrap().contains(&descriptor.name) {
            return Err(ChannelError::Fatal(format!(
                "scripted spawn failure for '{}'",
                descriptor.name
            )));
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            provider: descriptor.name.clone(),
            shared: self.shared.clone(),
        }))
    }
}

#[async_trait::async_trait]
impl ProviderChannel for MockChannel {
    async fn list_capabilities(&self, _timeout: Duration) -> Result<Vec<Capability>, ChannelError> {
        Ok(vec![Capability {
            name: "echo".to_string(),
            description: Some(format!("Echo capability of {}", self.provider)),
            input_schema: serde_json::json!({ "type": "object" }),
        }])
    }

    async fn invoke(
        &self,
        capability: &str,
        args: Value,
        _timeout: Duration,
    ) -> Result<InvokeResult, ChannelError> {
        let delay = *self.shared.invoke_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared
            .invocations
            .lock()
            .unwrap()
            .push((self.provider.clone(), capability.to_string()));
        let f = self.shared.invoke_fn.lock().unwrap().clone();
        f(&self.provider, capability, &args)
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}
