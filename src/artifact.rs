//! Single-use login artifacts (deeplink tokens and numeric codes).
//!
//! An artifact is keyed by its own value. Redemption is a check-and-set under
//! the store lock, so two concurrent redemptions of the same value cannot both
//! succeed. Unknown, used and expired values all read as `false` to callers.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::codes::{generate_numeric_code, generate_token};
use crate::config::{ArtifactPolicy, AuthConfig};
use crate::dispatch::{ResultDispatcher, ResultKind};
use crate::identity::Identity;

/// Retries when a freshly drawn code collides with a live one.
const MAX_GENERATE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Deeplink,
    Code,
}

impl ArtifactKind {
    #[must_use]
    pub const fn result_kind(self) -> ResultKind {
        match self {
            Self::Deeplink => ResultKind::Deeplink,
            Self::Code => ResultKind::Code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub used: bool,
    pub captured_identity: Option<Identity>,
}

pub struct ArtifactStore {
    kind: ArtifactKind,
    policy: ArtifactPolicy,
    bot_username: String,
    artifacts: Mutex<HashMap<String, Artifact>>,
    dispatcher: ResultDispatcher,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(
        kind: ArtifactKind,
        config: &AuthConfig,
        dispatcher: ResultDispatcher,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            policy: config.artifacts(),
            bot_username: config.bot_username().to_string(),
            artifacts: Mutex::new(HashMap::new()),
            dispatcher,
            audit,
            clock,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Register a fresh, unused artifact and return its value.
    ///
    /// # Errors
    /// Returns an error if the random source fails or no free code could be
    /// drawn.
    #[instrument(skip(self), fields(kind = ?self.kind))]
    pub async fn generate(&self) -> Result<String> {
        let mut artifacts = self.artifacts.lock().await;
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let value = match self.kind {
                ArtifactKind::Deeplink => generate_token()?,
                ArtifactKind::Code => generate_numeric_code(self.policy.code_length())?,
            };
            if artifacts.contains_key(&value) {
                debug!("generated artifact collided with a live one, retrying");
                continue;
            }
            artifacts.insert(
                value.clone(),
                Artifact {
                    value: value.clone(),
                    created_at: self.clock.now(),
                    used: false,
                    captured_identity: None,
                },
            );
            drop(artifacts);

            self.audit.record(
                AuditEvent::new(AuditEventKind::ArtifactGenerated)
                    .with_metadata(json!({ "kind": self.kind })),
            );
            return Ok(value);
        }
        Err(anyhow!(
            "failed to generate a unique {:?} artifact after {MAX_GENERATE_ATTEMPTS} attempts",
            self.kind
        ))
    }

    /// Redeem `value` on behalf of `identity`.
    ///
    /// Returns `true` exactly once per artifact; the captured identity is then
    /// dispatched on a detached task.
    #[instrument(skip(self, value, identity), fields(kind = ?self.kind, identity_id = %identity.id))]
    pub async fn redeem(&self, value: &str, identity: Identity) -> bool {
        let now = self.clock.now();
        let mut artifacts = self.artifacts.lock().await;
        let Some(artifact) = artifacts.get_mut(value).filter(|artifact| !artifact.used) else {
            warn!("rejected redemption of unknown or used artifact");
            self.record(AuditEventKind::ArtifactInvalidAttempt, &identity);
            return false;
        };

        if let Some(lifetime) = self.policy.lifetime() {
            if now - artifact.created_at > lifetime {
                warn!("rejected redemption of expired artifact");
                self.record(AuditEventKind::ArtifactExpired, &identity);
                return false;
            }
        }

        artifact.used = true;
        artifact.captured_identity = Some(identity.clone());
        drop(artifacts);

        self.record(AuditEventKind::ArtifactRedeemed, &identity);
        drop(self.dispatcher.dispatch(self.kind.result_kind(), identity));
        true
    }

    /// Mark `value` used without dispatching. Unknown or used values are left
    /// as they are.
    pub async fn invalidate(&self, value: &str) {
        let mut artifacts = self.artifacts.lock().await;
        if let Some(artifact) = artifacts.get_mut(value).filter(|artifact| !artifact.used) {
            artifact.used = true;
            drop(artifacts);
            self.audit.record(
                AuditEvent::new(AuditEventKind::ArtifactInvalidated)
                    .with_metadata(json!({ "kind": self.kind })),
            );
        }
    }

    /// Whether `value` would currently be accepted by [`Self::redeem`].
    pub async fn is_pending(&self, value: &str) -> bool {
        let now = self.clock.now();
        let artifacts = self.artifacts.lock().await;
        artifacts.get(value).is_some_and(|artifact| {
            !artifact.used
                && self
                    .policy
                    .lifetime()
                    .map_or(true, |lifetime| now - artifact.created_at <= lifetime)
        })
    }

    /// Copy of the stored artifact, if any.
    pub async fn artifact(&self, value: &str) -> Option<Artifact> {
        self.artifacts.lock().await.get(value).cloned()
    }

    /// Bot start link carrying `token` as its payload.
    #[must_use]
    pub fn deeplink_url(&self, token: &str) -> String {
        format!("https://t.me/{}?start={token}", self.bot_username)
    }

    fn record(&self, kind: AuditEventKind, identity: &Identity) {
        self.audit.record(
            AuditEvent::new(kind)
                .with_identity(identity)
                .with_metadata(json!({ "kind": self.kind })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::{ManualClock, SystemClock};
    use crate::dispatch::test_support::channel_dispatcher;
    use chrono::Duration;
    use secrecy::SecretString;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("123456:ABC".to_string()), "login_bot")
            .unwrap_or_else(|_| unreachable!("static config is valid"))
    }

    #[tokio::test]
    async fn redeem_succeeds_exactly_once() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let (dispatcher, mut rx) = channel_dispatcher(audit.clone());
        let store = ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config(),
            dispatcher,
            audit.clone(),
            Arc::new(SystemClock),
        );

        let token = store.generate().await?;
        assert!(store.is_pending(&token).await);
        assert!(store.redeem(&token, Identity::new("1")).await);

        let delivered = timeout(StdDuration::from_secs(1), rx.recv()).await?;
        assert_eq!(delivered.map(|identity| identity.id), Some("1".to_string()));

        assert!(!store.redeem(&token, Identity::new("2")).await);
        assert!(timeout(StdDuration::from_millis(100), rx.recv()).await.is_err());

        let artifact = store.artifact(&token).await;
        assert_eq!(
            artifact.and_then(|a| a.captured_identity).map(|i| i.id),
            Some("1".to_string())
        );
        assert_eq!(audit.count(AuditEventKind::ArtifactRedeemed), 1);
        assert_eq!(audit.count(AuditEventKind::ArtifactInvalidAttempt), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_value_is_rejected() {
        let audit = Arc::new(MemoryAuditSink::new());
        let store = ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config(),
            ResultDispatcher::disabled(audit.clone()),
            audit.clone(),
            Arc::new(SystemClock),
        );
        assert!(!store.redeem("nope", Identity::new("1")).await);
        assert!(!store.is_pending("nope").await);
    }

    #[tokio::test]
    async fn invalidate_blocks_redemption_without_dispatch() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let (dispatcher, mut rx) = channel_dispatcher(audit.clone());
        let store = ArtifactStore::new(
            ArtifactKind::Code,
            &config(),
            dispatcher,
            audit.clone(),
            Arc::new(SystemClock),
        );

        let code = store.generate().await?;
        store.invalidate(&code).await;
        store.invalidate(&code).await;
        store.invalidate("missing").await;

        assert!(!store.redeem(&code, Identity::new("1")).await);
        assert!(timeout(StdDuration::from_millis(100), rx.recv()).await.is_err());
        assert_eq!(audit.count(AuditEventKind::ArtifactInvalidated), 1);
        Ok(())
    }

    #[tokio::test]
    async fn expiry_policy_applies_when_configured() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(ManualClock::default());
        let config = config()
            .with_artifacts(ArtifactPolicy::new().with_lifetime(Duration::seconds(60)))?;
        let store = ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config,
            ResultDispatcher::disabled(audit.clone()),
            audit.clone(),
            clock.clone(),
        );

        let fresh = store.generate().await?;
        let stale = store.generate().await?;

        clock.advance(Duration::seconds(30));
        assert!(store.redeem(&fresh, Identity::new("1")).await);

        clock.advance(Duration::seconds(31));
        assert!(!store.is_pending(&stale).await);
        assert!(!store.redeem(&stale, Identity::new("1")).await);
        assert_eq!(audit.count(AuditEventKind::ArtifactExpired), 1);
        Ok(())
    }

    #[tokio::test]
    async fn artifacts_without_policy_never_expire() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(ManualClock::default());
        let store = ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config(),
            ResultDispatcher::disabled(audit.clone()),
            audit,
            clock.clone(),
        );
        let token = store.generate().await?;
        clock.advance(Duration::days(365));
        assert!(store.redeem(&token, Identity::new("1")).await);
        Ok(())
    }

    #[tokio::test]
    async fn codes_use_configured_length() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let config = config().with_artifacts(ArtifactPolicy::new().with_code_length(6))?;
        let store = ArtifactStore::new(
            ArtifactKind::Code,
            &config,
            ResultDispatcher::disabled(audit.clone()),
            audit,
            Arc::new(SystemClock),
        );
        let code = store.generate().await?;
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        Ok(())
    }

    #[test]
    fn deeplink_url_uses_bot_username() {
        let audit = Arc::new(MemoryAuditSink::new());
        let store = ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config(),
            ResultDispatcher::disabled(audit.clone()),
            audit,
            Arc::new(SystemClock),
        );
        assert_eq!(
            store.deeplink_url("abc"),
            "https://t.me/login_bot?start=abc"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redemptions_have_one_winner() -> Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let store = Arc::new(ArtifactStore::new(
            ArtifactKind::Deeplink,
            &config(),
            ResultDispatcher::disabled(audit.clone()),
            audit,
            Arc::new(SystemClock),
        ));
        let token = store.generate().await?;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                store.redeem(&token, Identity::new(i.to_string())).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await? {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }
}
