//! Connection Pool Manager — owns the table of live provider connections.
//!
//! Connections are keyed by (owner_id, provider_name) with at most one
//! live connection per key. Mutations for one key are serialized by a
//! per-key mutex (unrelated keys proceed concurrently); the table itself
//! is only locked for brief reads and writes, never across a transport
//! call. Capacity limits are checked under the same exclusion that
//! inserts the entry, so concurrent connect bursts cannot overshoot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::config::PoolLimits;
use crate::error::BrokerError;
use crate::registry::ProviderRegistry;
use crate::transport::{Capability, ChannelError, InvokeResult, ProviderChannel, Transport};

type Key = (String, String);

/// Lifecycle state of one pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Ready,
    Busy,
    Idle,
    Closing,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Busy => "busy",
            ConnectionState::Idle => "idle",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct PoolEntry {
    id: String,
    state: ConnectionState,
    /// In-flight invocation count; the state is Busy while this is > 0.
    busy: u32,
    /// None only while Connecting.
    channel: Option<Arc<dyn ProviderChannel>>,
    /// Capability manifest, cached for the connection's lifetime.
    capabilities: Option<Vec<Capability>>,
    created_at: DateTime<Utc>,
    last_used: Instant,
    last_used_at: DateTime<Utc>,
}

impl PoolEntry {
    fn connecting() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: ConnectionState::Connecting,
            busy: 0,
            channel: None,
            capabilities: None,
            created_at: Utc::now(),
            last_used: Instant::now(),
            last_used_at: Utc::now(),
        }
    }

    fn is_reusable(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Ready | ConnectionState::Busy | ConnectionState::Idle
        )
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
    }

    fn info(&self, key: &Key) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            owner_id: key.0.clone(),
            provider_name: key.1.clone(),
            state: self.state,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// Read-only summary of one pooled connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub owner_id: String,
    pub provider_name: String,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Snapshot of the pool for observability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total_connections: usize,
    pub per_owner_counts: HashMap<String, usize>,
    pub connections: Vec<ConnectionInfo>,
}

/// Owns provider connection lifecycle: connect/reuse, capacity limits,
/// invocation routing, idle reclamation.
pub struct ConnectionPool {
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn Transport>,
    limits: PoolLimits,
    connections: RwLock<HashMap<Key, PoolEntry>>,
    /// Per-key locks serializing connect/disconnect/evict for one key.
    key_locks: Mutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn Transport>,
        limits: PoolLimits,
    ) -> Self {
        Self {
            registry,
            transport,
            limits,
            connections: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &Key) -> Arc<Mutex<()>> {
        let mut map = self.key_locks.lock().await;
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Get or create the connection for (owner_id, provider_name).
    ///
    /// Reuses an existing Ready/Busy/Idle connection (refreshing its
    /// last-used stamp). Otherwise checks capacity, opens a channel via
    /// the transport adapter, and transitions Connecting → Ready, or
    /// evicts on failure.
    pub async fn connect(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<ConnectionInfo, BrokerError> {
        let descriptor = self
            .registry
            .get(provider_name)
            .ok_or_else(|| BrokerError::ProviderUnknown(provider_name.to_string()))?;

        let key = (owner_id.to_string(), provider_name.to_string());
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let mut stale: Option<PoolEntry> = None;
        {
            let mut conns = self.connections.write().await;
            match conns.get_mut(&key) {
                Some(entry) if entry.is_reusable() => {
                    entry.touch();
                    return Ok(entry.info(&key));
                }
                // Errored/Closed remnant: replace it
                Some(_) => {
                    stale = conns.remove(&key);
                }
                None => {}
            }

            // Capacity checks happen atomically with the placeholder
            // insert, so concurrent connects cannot overshoot the limits
            let owner_count = conns.keys().filter(|(o, _)| o == owner_id).count();
            if owner_count >= self.limits.max_connections_per_owner {
                return Err(BrokerError::CapacityExceeded(format!(
                    "owner '{}' already holds {} connections",
                    owner_id, owner_count
                )));
            }
            if conns.len() >= self.limits.max_total_connections {
                return Err(BrokerError::CapacityExceeded(format!(
                    "pool already holds {} connections",
                    conns.len()
                )));
            }
            conns.insert(key.clone(), PoolEntry::connecting());
        }

        if let Some(entry) = stale {
            if let Some(channel) = entry.channel {
                channel.close().await;
            }
        }

        // Open the channel outside the table lock; the per-key guard
        // keeps concurrent connects for this key out
        match self.transport.open(descriptor).await {
            Ok(channel) => {
                let mut conns = self.connections.write().await;
                let entry = conns.get_mut(&key).ok_or_else(|| {
                    BrokerError::Internal("connection evicted during connect".to_string())
                })?;
                entry.channel = Some(Arc::from(channel));
                entry.state = ConnectionState::Ready;
                entry.touch();
                tracing::info!(
                    "[ConnectionPool] Connected {}/{} ({})",
                    owner_id,
                    provider_name,
                    entry.id
                );
                Ok(entry.info(&key))
            }
            Err(e) => {
                self.connections.write().await.remove(&key);
                tracing::warn!(
                    "[ConnectionPool] Failed to connect {}/{}: {}",
                    owner_id,
                    provider_name,
                    e
                );
                Err(BrokerError::TransportFailure(format!(
                    "Failed to open '{}': {}",
                    provider_name, e
                )))
            }
        }
    }

    /// Close and remove the connection, if present. Returns false when
    /// nothing was connected (idempotent, not an error).
    pub async fn disconnect(&self, owner_id: &str, provider_name: &str) -> bool {
        let key = (owner_id.to_string(), provider_name.to_string());
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let entry = {
            let mut conns = self.connections.write().await;
            if let Some(entry) = conns.get_mut(&key) {
                entry.state = ConnectionState::Closing;
            }
            conns.remove(&key)
        };

        match entry {
            Some(entry) => {
                if let Some(channel) = entry.channel {
                    channel.close().await;
                }
                tracing::info!(
                    "[ConnectionPool] Disconnected {}/{}",
                    owner_id,
                    provider_name
                );
                true
            }
            None => false,
        }
    }

    /// Invoke one capability, lazily connecting if needed.
    ///
    /// The connection is Busy for the duration and is guaranteed to leave
    /// Busy on every exit path. Tool-level failures come back as
    /// `Ok(InvokeResult { is_error: true, .. })` with the connection left
    /// Ready; only transport-fatal errors evict it.
    pub async fn invoke(
        &self,
        owner_id: &str,
        provider_name: &str,
        capability: &str,
        args: Value,
    ) -> Result<InvokeResult, BrokerError> {
        self.connect(owner_id, provider_name).await?;
        let key = (owner_id.to_string(), provider_name.to_string());

        let channel = {
            let mut conns = self.connections.write().await;
            let entry = conns.get_mut(&key).ok_or_else(|| {
                BrokerError::NotConnected(format!("{}/{}", owner_id, provider_name))
            })?;
            let channel = entry.channel.clone().ok_or_else(|| {
                BrokerError::NotConnected(format!("{}/{}", owner_id, provider_name))
            })?;
            entry.busy += 1;
            entry.state = ConnectionState::Busy;
            channel
        };

        let result = channel
            .invoke(capability, args, self.limits.invoke_timeout())
            .await;

        let fatal = {
            let mut conns = self.connections.write().await;
            let mut fatal = false;
            if let Some(entry) = conns.get_mut(&key) {
                entry.busy = entry.busy.saturating_sub(1);
                match &result {
                    Ok(r) => {
                        entry.touch();
                        if entry.busy == 0 {
                            entry.state = if r.is_error {
                                ConnectionState::Ready
                            } else {
                                ConnectionState::Idle
                            };
                        }
                    }
                    // The request was abandoned; the channel may recover
                    Err(ChannelError::Timeout(_)) => {
                        if entry.busy == 0 {
                            entry.state = ConnectionState::Ready;
                        }
                    }
                    Err(ChannelError::Fatal(_)) => {
                        entry.state = ConnectionState::Errored;
                        fatal = true;
                    }
                }
            }
            fatal
        };

        if fatal {
            self.evict_errored(&key, "transport failure during invoke").await;
        }

        match result {
            Ok(r) => Ok(r),
            Err(ChannelError::Timeout(msg)) => Err(BrokerError::Timeout(msg)),
            Err(ChannelError::Fatal(msg)) => Err(BrokerError::InvocationFailure(msg)),
        }
    }

    /// Capability manifest for a provider, lazily connecting and caching
    /// per connection lifetime.
    pub async fn list_capabilities(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<Vec<Capability>, BrokerError> {
        self.connect(owner_id, provider_name).await?;
        let key = (owner_id.to_string(), provider_name.to_string());

        let channel = {
            let conns = self.connections.read().await;
            let entry = conns.get(&key).ok_or_else(|| {
                BrokerError::NotConnected(format!("{}/{}", owner_id, provider_name))
            })?;
            if let Some(caps) = &entry.capabilities {
                return Ok(caps.clone());
            }
            entry.channel.clone().ok_or_else(|| {
                BrokerError::NotConnected(format!("{}/{}", owner_id, provider_name))
            })?
        };

        match channel.list_capabilities(self.limits.invoke_timeout()).await {
            Ok(caps) => {
                let mut conns = self.connections.write().await;
                if let Some(entry) = conns.get_mut(&key) {
                    entry.capabilities = Some(caps.clone());
                    entry.touch();
                }
                Ok(caps)
            }
            Err(ChannelError::Timeout(msg)) => Err(BrokerError::Timeout(msg)),
            Err(ChannelError::Fatal(msg)) => {
                {
                    let mut conns = self.connections.write().await;
                    if let Some(entry) = conns.get_mut(&key) {
                        entry.state = ConnectionState::Errored;
                    }
                }
                self.evict_errored(&key, "capability discovery failed").await;
                Err(BrokerError::TransportFailure(msg))
            }
        }
    }

    /// Connection summaries, optionally scoped to one owner.
    pub async fn list_connections(&self, owner_id: Option<&str>) -> Vec<ConnectionInfo> {
        let conns = self.connections.read().await;
        let mut out: Vec<ConnectionInfo> = conns
            .iter()
            .filter(|((o, _), _)| owner_id.map(|want| o == want).unwrap_or(true))
            .map(|(key, entry)| entry.info(key))
            .collect();
        out.sort_by(|a, b| {
            (a.owner_id.as_str(), a.provider_name.as_str())
                .cmp(&(b.owner_id.as_str(), b.provider_name.as_str()))
        });
        out
    }

    /// Snapshot of the pool; never blocks on in-flight invocations.
    pub async fn status(&self) -> PoolStatus {
        let conns = self.connections.read().await;
        let mut per_owner_counts: HashMap<String, usize> = HashMap::new();
        let mut connections: Vec<ConnectionInfo> = Vec::with_capacity(conns.len());
        for (key, entry) in conns.iter() {
            *per_owner_counts.entry(key.0.clone()).or_insert(0) += 1;
            connections.push(entry.info(key));
        }
        connections.sort_by(|a, b| {
            (a.owner_id.as_str(), a.provider_name.as_str())
                .cmp(&(b.owner_id.as_str(), b.provider_name.as_str()))
        });
        PoolStatus {
            total_connections: conns.len(),
            per_owner_counts,
            connections,
        }
    }

    /// Reclaim Idle connections past the idle timeout. Returns how many
    /// were closed. Never touches a Busy connection.
    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now()).await
    }

    pub(crate) async fn sweep_idle_at(&self, now: Instant) -> usize {
        let idle_timeout = self.limits.idle_timeout();
        let expired: Vec<Key> = {
            let conns = self.connections.read().await;
            conns
                .iter()
                .filter(|(_, e)| {
                    e.state == ConnectionState::Idle
                        && e.busy == 0
                        && now.saturating_duration_since(e.last_used) > idle_timeout
                })
                .map(|(k, _)| k.clone())
                .collect()
        };

        let mut evicted = 0;
        for key in expired {
            let lock = self.key_lock(&key).await;
            let _guard = lock.lock().await;
            let removed = {
                let mut conns = self.connections.write().await;
                match conns.get(&key) {
                    // Re-check under the lock; a concurrent invoke may
                    // have touched or busied the connection since the scan
                    Some(e)
                        if e.state == ConnectionState::Idle
                            && e.busy == 0
                            && now.saturating_duration_since(e.last_used) > idle_timeout =>
                    {
                        conns.remove(&key)
                    }
                    _ => None,
                }
            };
            if let Some(entry) = removed {
                if let Some(channel) = entry.channel {
                    channel.close().await;
                }
                tracing::debug!(
                    "[ConnectionPool] Reclaimed idle connection {}/{}",
                    key.0,
                    key.1
                );
                evicted += 1;
            }
        }
        evicted
    }

    /// Run the idle sweep on a background interval.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self;
        let interval = pool.limits.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reclaimed = pool.sweep_idle().await;
                if reclaimed > 0 {
                    tracing::debug!(
                        "[ConnectionPool] Sweep reclaimed {} connections",
                        reclaimed
                    );
                }
            }
        })
    }

    /// Close every connection (process shutdown path).
    pub async fn shutdown(&self) {
        let entries: Vec<(Key, PoolEntry)> = {
            let mut conns = self.connections.write().await;
            conns.drain().collect()
        };
        for (key, entry) in entries {
            if let Some(channel) = entry.channel {
                channel.close().await;
            }
            tracing::debug!("[ConnectionPool] Closed {}/{}", key.0, key.1);
        }
    }

    async fn evict_errored(&self, key: &Key, reason: &str) {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        let removed = {
            let mut conns = self.connections.write().await;
            match conns.get(key) {
                Some(e) if e.state == ConnectionState::Errored => conns.remove(key),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            if let Some(channel) = entry.channel {
                channel.close().await;
            }
            tracing::warn!("[ConnectionPool] Evicted {}/{}: {}", key.0, key.1, reason);
        }
    }

    #[cfg(test)]
    pub(crate) async fn connection_state(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Option<ConnectionState> {
        let key = (owner_id.to_string(), provider_name.to_string());
        self.connections.read().await.get(&key).map(|e| e.state)
    }
}
