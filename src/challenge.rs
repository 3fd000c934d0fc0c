//! Two-factor challenges keyed by subject.
//!
//! Flow Overview:
//! 1) `start` draws a numeric code and replaces any live challenge for the
//!    subject, resetting its attempt counter.
//! 2) `verify` checks, in order: the challenge exists, has not expired, has not
//!    been used, and has attempts left. None of these checks consume an attempt.
//! 3) Only then is an attempt consumed and the code compared. A match marks the
//!    challenge used and verified and dispatches the result.
//!
//! Security boundaries:
//! - Attempt exhaustion is permanent for that challenge; only a new `start`
//!   resets it.
//! - Codes are compared in constant time.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::codes::{constant_time_eq, generate_numeric_code};
use crate::config::{AuthConfig, ChallengeConfig};
use crate::dispatch::{ResultDispatcher, ResultKind};
use crate::identity::Identity;

#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    pub subject_id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub verified: bool,
    pub attempts: u32,
    pub captured_identity: Option<Identity>,
}

impl Challenge {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

pub struct ChallengeStore {
    config: ChallengeConfig,
    challenges: Mutex<HashMap<String, Challenge>>,
    dispatcher: ResultDispatcher,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ChallengeStore {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        dispatcher: ResultDispatcher,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: config.challenge(),
            challenges: Mutex::new(HashMap::new()),
            dispatcher,
            audit,
            clock,
        }
    }

    /// Start (or restart) the challenge for `subject_id` and return its code.
    ///
    /// # Errors
    /// Returns an error if the random source fails or the expiry does not fit
    /// in a timestamp.
    #[instrument(skip(self, identity))]
    pub async fn start(&self, subject_id: &str, identity: Option<Identity>) -> Result<String> {
        let code = generate_numeric_code(self.config.code_length())?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.config.code_lifetime())
            .ok_or_else(|| anyhow!("challenge expiry is out of range"))?;
        let challenge = Challenge {
            subject_id: subject_id.to_string(),
            code: code.clone(),
            created_at: now,
            expires_at,
            used: false,
            verified: false,
            attempts: 0,
            captured_identity: identity,
        };

        let replaced = self
            .challenges
            .lock()
            .await
            .insert(subject_id.to_string(), challenge)
            .is_some();
        if replaced {
            debug!("replaced live challenge");
        }

        self.record(AuditEventKind::ChallengeStarted, subject_id, None);
        Ok(code)
    }

    /// Check `code` against the live challenge for `subject_id`.
    #[instrument(skip(self, code))]
    pub async fn verify(&self, subject_id: &str, code: &str) -> bool {
        let now = self.clock.now();
        let max_attempts = self.config.max_attempts();
        let mut challenges = self.challenges.lock().await;

        let Some(challenge) = challenges.get_mut(subject_id) else {
            debug!("no challenge for subject");
            self.record(AuditEventKind::ChallengeFailed, subject_id, Some("missing"));
            return false;
        };

        if challenge.is_expired(now) {
            warn!("challenge expired");
            self.record(AuditEventKind::ChallengeExpired, subject_id, None);
            return false;
        }

        if challenge.used {
            warn!("challenge already used");
            self.record(AuditEventKind::ChallengeFailed, subject_id, Some("used"));
            return false;
        }

        if challenge.attempts >= max_attempts {
            warn!("challenge attempts exhausted");
            self.record(AuditEventKind::ChallengeExhausted, subject_id, None);
            return false;
        }

        challenge.attempts += 1;
        if !constant_time_eq(&challenge.code, code) {
            let attempts = challenge.attempts;
            drop(challenges);
            warn!(attempts, max_attempts, "challenge code mismatch");
            self.record(AuditEventKind::ChallengeFailed, subject_id, Some("mismatch"));
            return false;
        }

        challenge.used = true;
        challenge.verified = true;
        let identity = challenge
            .captured_identity
            .clone()
            .unwrap_or_else(|| Identity::verified_subject(subject_id));
        drop(challenges);

        info!("challenge verified");
        self.audit.record(
            AuditEvent::new(AuditEventKind::ChallengeVerified)
                .with_identity(&identity)
                .with_metadata(json!({ "subject_id": subject_id })),
        );
        drop(self.dispatcher.dispatch(ResultKind::TwoFactor, identity));
        true
    }

    /// Whether the challenge for `subject_id` has been verified.
    pub async fn is_verified(&self, subject_id: &str) -> bool {
        self.challenges
            .lock()
            .await
            .get(subject_id)
            .is_some_and(|challenge| challenge.verified)
    }

    /// Attempts left on the live challenge; `None` when there is none.
    pub async fn attempts_remaining(&self, subject_id: &str) -> Option<u32> {
        self.challenges
            .lock()
            .await
            .get(subject_id)
            .map(|challenge| self.config.max_attempts().saturating_sub(challenge.attempts))
    }

    /// Drop the challenge and its attempt counter for `subject_id`.
    pub async fn reset(&self, subject_id: &str) {
        let removed = self.challenges.lock().await.remove(subject_id).is_some();
        if removed {
            self.record(AuditEventKind::ChallengeReset, subject_id, None);
        }
    }

    /// Remove expired, unverified challenges. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        challenges.retain(|_, challenge| challenge.verified || !challenge.is_expired(now));
        before - challenges.len()
    }

    fn record(&self, kind: AuditEventKind, subject_id: &str, reason: Option<&str>) {
        let metadata = match reason {
            Some(reason) => json!({ "subject_id": subject_id, "reason": reason }),
            None => json!({ "subject_id": subject_id }),
        };
        self.audit.record(AuditEvent::new(kind).with_metadata(metadata));
    }
}
