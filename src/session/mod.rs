//! Sessions minted after a successful verification.
//!
//! Flow Overview:
//! 1) `open` loads the last snapshot from the persistence adapter. A failed
//!    load is logged and the store starts empty.
//! 2) Every mutation (create, refresh on read, update, delete) happens under
//!    the store lock and queues a full snapshot for the background writer.
//! 3) A session whose last activity is older than the configured lifetime is
//!    treated as absent; the first access that notices removes it, and the
//!    sweeper removes the rest.
//!
//! The in-memory map is the source of truth. A failed save is logged and never
//! rolls back memory.

pub mod persistence;
pub mod postgres;
pub mod sweeper;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::config::SessionConfig;

pub use self::persistence::{JsonFilePersistence, MemoryPersistence, SessionPersistence};
pub use self::postgres::PgSessionPersistence;
pub use self::sweeper::{spawn_sweeper, SweeperConfig};

use self::persistence::SnapshotWriter;
use crate::identity::Identity;

/// Retries when the id generator hands back an id that is already taken.
const MAX_ID_ATTEMPTS: usize = 8;

/// Source of new session ids.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Random UUIDv4 ids in simple (unhyphenated) form.
#[must_use]
pub fn uuid_id_generator() -> IdGenerator {
    Arc::new(|| uuid::Uuid::new_v4().simple().to_string())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        now - self.last_activity > lifetime
    }
}

pub struct SessionStore {
    lifetime: Duration,
    id_generator: IdGenerator,
    sessions: Mutex<HashMap<String, Session>>,
    writer: SnapshotWriter,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Build the store and load the last persisted snapshot.
    ///
    /// Must be called from within a tokio runtime: the background writer is
    /// spawned here.
    pub async fn open(
        config: SessionConfig,
        id_generator: IdGenerator,
        persistence: Arc<dyn SessionPersistence>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = match persistence.load().await {
            Ok(sessions) => {
                info!(count = sessions.len(), "sessions loaded");
                sessions
                    .into_iter()
                    .map(|session| (session.id.clone(), session))
                    .collect()
            }
            Err(err) => {
                warn!("failed to load sessions, starting empty: {err:#}");
                HashMap::new()
            }
        };

        Self {
            lifetime: config.lifetime(),
            id_generator,
            sessions: Mutex::new(sessions),
            writer: SnapshotWriter::spawn(persistence),
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Create a session for `identity`.
    ///
    /// # Errors
    /// Returns an error if the id generator keeps returning ids already in use.
    #[instrument(skip_all, fields(identity_id = %identity.id))]
    pub async fn create(&self, identity: Identity, metadata: Option<Map<String, Value>>) -> Result<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let id = (0..MAX_ID_ATTEMPTS)
            .map(|_| (self.id_generator)())
            .find(|id| !id.is_empty() && !sessions.contains_key(id))
            .ok_or_else(|| anyhow!("failed to generate a unique session id"))?;

        let session = Session {
            id: id.clone(),
            identity,
            created_at: now,
            last_activity: now,
            metadata: metadata.unwrap_or_default(),
        };
        sessions.insert(id, session.clone());
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        debug!(session_id = %session.id, "session created");
        self.audit.record(
            AuditEvent::new(AuditEventKind::SessionCreated)
                .with_identity(&session.identity)
                .with_metadata(json!({ "session_id": session.id })),
        );
        Ok(session)
    }

    /// Look up a live session and refresh its activity.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Option<Session> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let session = sessions.get_mut(id)?;
        if session.is_expired(now, self.lifetime) {
            let expired = sessions.remove(id)?;
            self.writer.submit(snapshot(&sessions));
            drop(sessions);
            self.record_expired(&expired);
            return None;
        }

        session.last_activity = session.last_activity.max(now);
        let session = session.clone();
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        self.record(AuditEventKind::SessionAccessed, &session);
        Some(session)
    }

    /// Merge `patch` into the session metadata and refresh its activity.
    ///
    /// A `null` value in the patch removes that key.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: Map<String, Value>) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.is_expired(now, self.lifetime) {
            if let Some(expired) = sessions.remove(id) {
                self.writer.submit(snapshot(&sessions));
                drop(sessions);
                self.record_expired(&expired);
            }
            return false;
        }

        for (key, value) in patch {
            if value.is_null() {
                session.metadata.remove(&key);
            } else {
                session.metadata.insert(key, value);
            }
        }
        session.last_activity = session.last_activity.max(now);
        let session = session.clone();
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        self.record(AuditEventKind::SessionUpdated, &session);
        true
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(removed) = sessions.remove(id) else {
            return false;
        };
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        self.record(AuditEventKind::SessionDeleted, &removed);
        true
    }

    /// Delete every session belonging to `identity_id`. Returns how many were
    /// removed.
    #[instrument(skip(self))]
    pub async fn clear_for_identity(&self, identity_id: &str) -> usize {
        let mut sessions = self.sessions.lock().await;
        let ids: Vec<String> = sessions
            .values()
            .filter(|session| session.identity.id == identity_id)
            .map(|session| session.id.clone())
            .collect();
        if ids.is_empty() {
            return 0;
        }

        let removed: Vec<Session> = ids.iter().filter_map(|id| sessions.remove(id)).collect();
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        for session in &removed {
            self.record(AuditEventKind::SessionDeleted, session);
        }
        removed.len()
    }

    /// Live sessions of `identity_id`, oldest first. Does not refresh activity.
    pub async fn list_for_identity(&self, identity_id: &str) -> Vec<Session> {
        let now = self.clock.now();
        let sessions = self.sessions.lock().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|session| session.identity.id == identity_id)
            .filter(|session| !session.is_expired(now, self.lifetime))
            .cloned()
            .collect();
        drop(sessions);
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Every live session, oldest first. Does not refresh activity.
    pub async fn list(&self) -> Vec<Session> {
        let now = self.clock.now();
        let sessions = self.sessions.lock().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|session| !session.is_expired(now, self.lifetime))
            .cloned()
            .collect();
        drop(sessions);
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Number of stored sessions, expired ones not yet swept included.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remove expired sessions. Persists once, only when something was removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|session| session.is_expired(now, self.lifetime))
            .map(|session| session.id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let removed: Vec<Session> = expired.iter().filter_map(|id| sessions.remove(id)).collect();
        self.writer.submit(snapshot(&sessions));
        drop(sessions);

        for session in &removed {
            self.record_expired(session);
        }
        removed.len()
    }

    /// Save the current snapshot and wait for the adapter.
    ///
    /// # Errors
    /// Returns the adapter error.
    pub async fn persist_now(&self) -> Result<()> {
        self.writer
            .save_now(async { snapshot(&*self.sessions.lock().await) })
            .await
    }

    fn record(&self, kind: AuditEventKind, session: &Session) {
        self.audit.record(
            AuditEvent::new(kind)
                .with_identity(&session.identity)
                .with_metadata(json!({ "session_id": session.id })),
        );
    }

    fn record_expired(&self, session: &Session) {
        debug!(session_id = %session.id, "session expired");
        self.record(AuditEventKind::SessionExpired, session);
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

fn snapshot(sessions: &HashMap<String, Session>) -> Vec<Session> {
    let mut all: Vec<Session> = sessions.values().cloned().collect();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    all
}
