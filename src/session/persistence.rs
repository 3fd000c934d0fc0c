//! Snapshot persistence for sessions.
//!
//! Adapters only ever see the full set of sessions: `save` replaces whatever
//! was stored before and `load` returns the last saved set. The store calls
//! `load` once at startup; after that, writes go through [`SnapshotWriter`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error};

use super::Session;

#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load(&self) -> Result<Vec<Session>>;
    async fn save(&self, sessions: &[Session]) -> Result<()>;
}

/// Keeps the last snapshot in memory. Useful for tests and single-process hosts
/// that do not need sessions to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    sessions: Mutex<Vec<Session>>,
}

impl MemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
        }
    }

    /// Last saved snapshot.
    pub async fn snapshot(&self) -> Vec<Session> {
        self.sessions.lock().await.clone()
    }
}

#[async_trait]
impl SessionPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Vec<Session>> {
        Ok(self.snapshot().await)
    }

    async fn save(&self, sessions: &[Session]) -> Result<()> {
        *self.sessions.lock().await = sessions.to_vec();
        Ok(())
    }
}

/// JSON array of sessions in a single file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact. A missing file loads
/// as an empty set.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Vec<Session>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no session snapshot yet");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session snapshot {}", self.path.display())
                })
            }
        };

        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse session snapshot {}", self.path.display()))
    }

    async fn save(&self, sessions: &[Session]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let body = serde_json::to_vec_pretty(sessions).context("failed to encode sessions")?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, body)
            .await
            .with_context(|| format!("failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Background writer mirroring store snapshots to the adapter.
///
/// Only the latest submitted snapshot is kept: a burst of mutations while a
/// save is in flight collapses into one follow-up save. Saves never overlap,
/// so an older snapshot cannot land after a newer one.
pub(crate) struct SnapshotWriter {
    tx: watch::Sender<Option<Arc<Vec<Session>>>>,
    save_lock: Arc<Mutex<()>>,
    persistence: Arc<dyn SessionPersistence>,
}

impl SnapshotWriter {
    pub(crate) fn spawn(persistence: Arc<dyn SessionPersistence>) -> Self {
        let (tx, mut rx) = watch::channel::<Option<Arc<Vec<Session>>>>(None);
        let save_lock = Arc::new(Mutex::new(()));

        // Exits once the sender is dropped, after saving any pending snapshot.
        {
            let persistence = Arc::clone(&persistence);
            let save_lock = Arc::clone(&save_lock);
            tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    let _guard = save_lock.lock().await;
                    let snapshot = rx.borrow_and_update().clone();
                    if let Some(sessions) = snapshot {
                        if let Err(err) = persistence.save(&sessions).await {
                            error!("failed to persist sessions: {err:#}");
                        } else {
                            debug!(count = sessions.len(), "sessions persisted");
                        }
                    }
                }
            });
        }

        Self {
            tx,
            save_lock,
            persistence,
        }
    }

    /// Queue `sessions` for saving without waiting.
    pub(crate) fn submit(&self, sessions: Vec<Session>) {
        self.tx.send_replace(Some(Arc::new(sessions)));
    }

    /// Save the snapshot produced by `take` now, serialized with the
    /// background writer.
    ///
    /// `take` only runs once the save lock is held, so the snapshot is never
    /// older than one the background writer already saved.
    pub(crate) async fn save_now<F>(&self, take: F) -> Result<()>
    where
        F: Future<Output = Vec<Session>>,
    {
        let _guard = self.save_lock.lock().await;
        let sessions = take.await;
        self.persistence.save(&sessions).await
    }
}
