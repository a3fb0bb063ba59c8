//! Auth gate — verified-credential checks for providers that need them.
//!
//! The engine only consumes [`AuthGate::is_verified`]; managing
//! verifications (marking, revoking) is a concern of the shipped SQLite
//! implementation and its CLI/HTTP surfaces.

use chrono::Utc;

use crate::db::Database;
use crate::error::BrokerError;

/// Fast, side-effect-free read consulted before a run touches a provider
/// whose descriptor requires auth.
#[async_trait::async_trait]
pub trait AuthGate: Send + Sync {
    async fn is_verified(&self, owner_id: &str, provider_name: &str)
        -> Result<bool, BrokerError>;
}

/// SQLite-backed verification table.
#[derive(Clone)]
pub struct SqliteAuthGate {
    db: Database,
}

impl SqliteAuthGate {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record that the owner's credentials for a provider are confirmed.
    pub async fn mark_verified(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<(), BrokerError> {
        let owner = owner_id.to_string();
        let provider = provider_name.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO verifications (owner_id, provider_name, verified_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(owner_id, provider_name) DO UPDATE SET
                       verified_at = excluded.verified_at",
                    rusqlite::params![owner, provider, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Remove a verification. Idempotent; returns whether one existed.
    pub async fn revoke(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<bool, BrokerError> {
        let owner = owner_id.to_string();
        let provider = provider_name.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "DELETE FROM verifications WHERE owner_id = ?1 AND provider_name = ?2",
                    rusqlite::params![owner, provider],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Provider names verified for one owner, sorted.
    pub async fn list_verified(&self, owner_id: &str) -> Result<Vec<String>, BrokerError> {
        let owner = owner_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT provider_name FROM verifications
                     WHERE owner_id = ?1 ORDER BY provider_name ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

#[async_trait::async_trait]
impl AuthGate for SqliteAuthGate {
    async fn is_verified(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<bool, BrokerError> {
        let owner = owner_id.to_string();
        let provider = provider_name.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT 1 FROM verifications WHERE owner_id = ?1 AND provider_name = ?2",
                )?;
                let exists = stmt.exists(rusqlite::params![owner, provider])?;
                Ok(exists)
            })
            .await
    }
}
