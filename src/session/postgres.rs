//! Postgres-backed session snapshots.
//!
//! Table layout (created by [`PgSessionPersistence::ensure_schema`]):
//!
//! ```sql
//! CREATE TABLE auth_sessions (
//!     id            TEXT PRIMARY KEY,
//!     identity      JSONB NOT NULL,
//!     created_at    BIGINT NOT NULL, -- unix millis
//!     last_activity BIGINT NOT NULL, -- unix millis
//!     metadata      JSONB NOT NULL
//! );
//! ```
//!
//! `save` replaces the table contents inside one transaction so readers never
//! observe half a snapshot.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, instrument};

use super::persistence::SessionPersistence;
use super::Session;
use crate::identity::Identity;

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS auth_sessions (
        id TEXT PRIMARY KEY,
        identity JSONB NOT NULL,
        created_at BIGINT NOT NULL,
        last_activity BIGINT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb
    )
";

#[derive(Clone, Debug)]
pub struct PgSessionPersistence {
    pool: PgPool,
}

impl PgSessionPersistence {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool against `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be reached.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// # Errors
    /// Returns an error if the table cannot be created.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create auth_sessions table")?;
        Ok(())
    }
}

#[async_trait]
impl SessionPersistence for PgSessionPersistence {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r"
            SELECT id, identity::text AS identity, created_at, last_activity, metadata::text AS metadata
            FROM auth_sessions
            ORDER BY created_at, id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load sessions")?;

        let sessions = rows.iter().map(session_from_row).collect::<Result<Vec<_>>>()?;
        debug!(count = sessions.len(), "sessions loaded");
        Ok(sessions)
    }

    #[instrument(skip(self, sessions), fields(count = sessions.len()))]
    async fn save(&self, sessions: &[Session]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM auth_sessions")
            .execute(&mut *tx)
            .await
            .context("Failed to clear sessions")?;

        for session in sessions {
            let identity = serde_json::to_string(&session.identity)?;
            let metadata = serde_json::to_string(&session.metadata)?;
            sqlx::query(
                r"
                INSERT INTO auth_sessions (id, identity, created_at, last_activity, metadata)
                VALUES ($1, $2::jsonb, $3, $4, $5::jsonb)
                ",
            )
            .bind(&session.id)
            .bind(identity)
            .bind(session.created_at.timestamp_millis())
            .bind(session.last_activity.timestamp_millis())
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert session {}", session.id))?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let identity: String = row.try_get("identity")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: i64 = row.try_get("created_at")?;
    let last_activity: i64 = row.try_get("last_activity")?;

    let identity: Identity = serde_json::from_str(&identity)
        .with_context(|| format!("invalid identity for session {id}"))?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata)
        .with_context(|| format!("invalid metadata for session {id}"))?;

    Ok(Session {
        created_at: from_millis(created_at, &id)?,
        last_activity: from_millis(last_activity, &id)?,
        id,
        identity,
        metadata,
    })
}

fn from_millis(millis: i64, id: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow!("timestamp {millis} out of range for session {id}"))
}
