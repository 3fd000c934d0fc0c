//! Audit sink for state transitions.
//!
//! Stores report every transition (generation, redemption, failed attempt,
//! expiry, session lifecycle) to an injected [`AuditSink`]. Recording is
//! fire-and-forget: the sink cannot fail the operation that reported it.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Mutex;
use tracing::info;

use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ArtifactGenerated,
    ArtifactRedeemed,
    ArtifactInvalidAttempt,
    ArtifactExpired,
    ArtifactInvalidated,
    ChallengeStarted,
    ChallengeVerified,
    ChallengeFailed,
    ChallengeExpired,
    ChallengeExhausted,
    ChallengeReset,
    WidgetAccepted,
    WidgetRejected,
    SessionCreated,
    SessionAccessed,
    SessionUpdated,
    SessionDeleted,
    SessionExpired,
    DispatchFailed,
}

impl AuditEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArtifactGenerated => "artifact_generated",
            Self::ArtifactRedeemed => "artifact_redeemed",
            Self::ArtifactInvalidAttempt => "artifact_invalid_attempt",
            Self::ArtifactExpired => "artifact_expired",
            Self::ArtifactInvalidated => "artifact_invalidated",
            Self::ChallengeStarted => "challenge_started",
            Self::ChallengeVerified => "challenge_verified",
            Self::ChallengeFailed => "challenge_failed",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeExhausted => "challenge_exhausted",
            Self::ChallengeReset => "challenge_reset",
            Self::WidgetAccepted => "widget_accepted",
            Self::WidgetRejected => "widget_rejected",
            Self::SessionCreated => "session_created",
            Self::SessionAccessed => "session_accessed",
            Self::SessionUpdated => "session_updated",
            Self::SessionDeleted => "session_deleted",
            Self::SessionExpired => "session_expired",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub identity: Option<Identity>,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            kind,
            identity: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.identity = Some(identity.clone());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: one structured log line per event.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let identity_id = event.identity.as_ref().map(|identity| identity.id.as_str());
        let metadata = event
            .metadata
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        info!(
            event = %event.kind,
            identity_id = identity_id.unwrap_or(""),
            metadata = %metadata,
            "audit"
        );
    }
}

#[derive(Clone, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Sink that keeps events in memory so they can be inspected.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    #[must_use]
    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
