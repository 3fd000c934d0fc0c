//! Login-widget payload verification.
//!
//! The identity provider signs the widget payload with a key derived from the
//! bot token:
//!
//! ```text
//! secret    = SHA-256(bot_token)
//! canonical = every field except `hash`, sorted by key, `key=value` joined by '\n'
//! hash      = hex(HMAC-SHA-256(secret, canonical))
//! ```
//!
//! A payload is accepted only when the required fields are present, it was
//! issued within the last 24 hours and `hash` is exactly the recomputed
//! lowercase hex digest.
//! Checks run in that order, so a stale payload is rejected regardless of its
//! signature.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::clock::Clock;
use crate::codes::constant_time_eq;
use crate::config::AuthConfig;
use crate::dispatch::{ResultDispatcher, ResultKind};
use crate::identity::Identity;

type HmacSha256 = Hmac<Sha256>;

/// Payloads older than this are stale.
pub const MAX_AUTH_AGE_SECONDS: i64 = 24 * 60 * 60;

const REQUIRED_FIELDS: [&str; 4] = ["id", "first_name", "auth_date", "hash"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WidgetRejection {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("auth_date is older than {MAX_AUTH_AGE_SECONDS} seconds")]
    Stale,
    #[error("signature mismatch")]
    BadSignature,
}

impl WidgetRejection {
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidField(_) => "invalid_field",
            Self::Stale => "stale",
            Self::BadSignature => "bad_signature",
        }
    }
}

/// Key the provider signs widget payloads with.
#[must_use]
pub fn widget_secret(bot_token: &str) -> [u8; 32] {
    Sha256::digest(bot_token.as_bytes()).into()
}

/// Canonical data-check string for `payload`.
///
/// String values are used verbatim, other values in their JSON form.
#[must_use]
pub fn canonical_string(payload: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&str, &Value> = payload
        .iter()
        .filter(|(key, _)| key.as_str() != "hash")
        .map(|(key, value)| (key.as_str(), value))
        .collect();

    sorted
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lowercase hex HMAC-SHA-256 of `canonical` under `secret`.
///
/// # Errors
/// Returns an error if the MAC cannot be keyed.
pub fn compute_hash(secret: &[u8], canonical: &str) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|err| anyhow!("failed to key HMAC: {err}"))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub struct SignatureVerifier {
    secret: SecretBox<[u8; 32]>,
    dispatcher: ResultDispatcher,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        dispatcher: ResultDispatcher,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let secret = widget_secret(config.bot_token().expose_secret());
        Self {
            secret: SecretBox::new(Box::new(secret)),
            dispatcher,
            audit,
            clock,
        }
    }

    /// Verify a widget payload and dispatch the identity it carries.
    ///
    /// # Errors
    /// Returns the reason the payload was rejected.
    #[instrument(skip_all)]
    pub fn verify(&self, payload: Map<String, Value>) -> Result<Identity, WidgetRejection> {
        match self.check(payload) {
            Ok(identity) => {
                debug!(identity_id = %identity.id, "widget payload accepted");
                self.audit.record(
                    AuditEvent::new(AuditEventKind::WidgetAccepted).with_identity(&identity),
                );
                drop(self.dispatcher.dispatch(ResultKind::Widget, identity.clone()));
                Ok(identity)
            }
            Err(rejection) => {
                warn!(reason = rejection.reason(), "widget payload rejected: {rejection}");
                self.audit.record(
                    AuditEvent::new(AuditEventKind::WidgetRejected)
                        .with_metadata(json!({ "reason": rejection.reason(), "detail": rejection.to_string() })),
                );
                Err(rejection)
            }
        }
    }

    fn check(&self, mut payload: Map<String, Value>) -> Result<Identity, WidgetRejection> {
        for field in REQUIRED_FIELDS {
            if payload.get(field).map_or(true, Value::is_null) {
                return Err(WidgetRejection::MissingField(field));
            }
        }

        let auth_date = payload
            .get("auth_date")
            .and_then(parse_timestamp)
            .ok_or(WidgetRejection::InvalidField("auth_date"))?;
        let age = self
            .clock
            .now()
            .timestamp()
            .checked_sub(auth_date)
            .ok_or(WidgetRejection::InvalidField("auth_date"))?;
        if age > MAX_AUTH_AGE_SECONDS {
            return Err(WidgetRejection::Stale);
        }

        let provided = match payload.get("hash") {
            Some(Value::String(hash)) => hash.clone(),
            _ => return Err(WidgetRejection::InvalidField("hash")),
        };

        let canonical = canonical_string(&payload);
        let expected = compute_hash(self.secret.expose_secret(), &canonical).map_err(|err| {
            error!("failed to compute widget hash: {err:#}");
            WidgetRejection::BadSignature
        })?;
        if !constant_time_eq(&expected, &provided) {
            return Err(WidgetRejection::BadSignature);
        }

        payload.remove("hash");
        Identity::from_fields(payload).ok_or(WidgetRejection::InvalidField("id"))
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

/// `auth_date` arrives either as a JSON number or as a numeric string.
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::dispatch::test_support::channel_dispatcher;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    const BOT_TOKEN: &str = "123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11";
    const NOW: i64 = 1_700_000_000;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from(BOT_TOKEN.to_string()), "login_bot")
            .unwrap_or_else(|_| unreachable!("static config is valid"))
    }

    fn clock() -> Arc<ManualClock> {
        let now = Utc.timestamp_opt(NOW, 0).single().unwrap_or_default();
        Arc::new(ManualClock::new(now))
    }

    fn signed(mut payload: Map<String, Value>) -> Map<String, Value> {
        let hash = compute_hash(&widget_secret(BOT_TOKEN), &canonical_string(&payload))
            .unwrap_or_default();
        payload.insert("hash".to_string(), json!(hash));
        payload
    }

    fn payload(auth_date: i64) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("id".to_string(), json!(42));
        payload.insert("first_name".to_string(), json!("Ada"));
        payload.insert("username".to_string(), json!("ada"));
        payload.insert("auth_date".to_string(), json!(auth_date));
        payload
    }

    fn verifier(audit: Arc<MemoryAuditSink>) -> SignatureVerifier {
        SignatureVerifier::new(
            &config(),
            ResultDispatcher::disabled(audit.clone()),
            audit,
            clock(),
        )
    }

    #[test]
    fn canonical_string_sorts_and_skips_hash() {
        let mut payload = payload(NOW);
        payload.insert("hash".to_string(), json!("ignored"));
        payload.insert("last_name".to_string(), json!("Lovelace"));
        assert_eq!(
            canonical_string(&payload),
            "auth_date=1700000000\nfirst_name=Ada\nid=42\nlast_name=Lovelace\nusername=ada"
        );
    }

    #[test]
    fn digest_is_deterministic_lowercase_hex() -> Result<()> {
        let secret = widget_secret(BOT_TOKEN);
        let a = compute_hash(&secret, "auth_date=1\nid=1")?;
        let b = compute_hash(&secret, "auth_date=1\nid=1")?;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(a, compute_hash(&widget_secret("other"), "auth_date=1\nid=1")?);
        Ok(())
    }

    #[tokio::test]
    async fn valid_payload_yields_identity_and_dispatches() -> anyhow::Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let (dispatcher, mut rx) = channel_dispatcher(audit.clone());
        let verifier = SignatureVerifier::new(&config(), dispatcher, audit.clone(), clock());

        let identity = verifier.verify(signed(payload(NOW - 60)))?;
        assert_eq!(identity.id, "42");
        assert_eq!(identity.first_name.as_deref(), Some("Ada"));
        assert_eq!(identity.username.as_deref(), Some("ada"));
        assert_eq!(identity.extra.get("auth_date"), Some(&json!(NOW - 60)));
        assert!(!identity.extra.contains_key("hash"));

        let delivered = timeout(StdDuration::from_secs(1), rx.recv()).await?;
        assert_eq!(delivered, Some(identity));
        assert_eq!(audit.count(AuditEventKind::WidgetAccepted), 1);
        Ok(())
    }

    #[test]
    fn string_auth_date_is_accepted_but_uppercase_hash_is_not() {
        let audit = Arc::new(MemoryAuditSink::new());
        let verifier = verifier(audit);
        let mut fields = payload(NOW);
        fields.insert("auth_date".to_string(), json!(NOW.to_string()));
        let fields = signed(fields);
        assert!(verifier.verify(fields.clone()).is_ok());

        let mut upper = fields;
        let hash = upper
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_ascii_uppercase)
            .unwrap_or_default();
        upper.insert("hash".to_string(), json!(hash));
        assert_eq!(verifier.verify(upper).err(), Some(WidgetRejection::BadSignature));
    }

    #[test]
    fn auth_date_far_in_the_past_is_rejected_without_overflow() {
        let audit = Arc::new(MemoryAuditSink::new());
        let verifier = verifier(audit);

        let mut fields = payload(NOW);
        fields.insert("auth_date".to_string(), json!(i64::MIN));
        fields.insert("hash".to_string(), json!("00"));
        assert_eq!(
            verifier.verify(fields).err(),
            Some(WidgetRejection::InvalidField("auth_date"))
        );

        let mut fields = payload(NOW);
        fields.insert("auth_date".to_string(), json!(i64::MIN.to_string()));
        let fields = signed(fields);
        assert_eq!(
            verifier.verify(fields).err(),
            Some(WidgetRejection::InvalidField("auth_date"))
        );
    }

    #[test]
    fn signed_payload_verifies_outside_a_runtime() -> anyhow::Result<()> {
        let audit = Arc::new(MemoryAuditSink::new());
        let (dispatcher, _rx) = channel_dispatcher(audit.clone());
        let with_channel = SignatureVerifier::new(&config(), dispatcher, audit.clone(), clock());

        let identity = with_channel.verify(signed(payload(NOW)))?;
        assert_eq!(identity.id, "42");
        assert_eq!(audit.count(AuditEventKind::WidgetAccepted), 1);
        assert_eq!(audit.count(AuditEventKind::DispatchFailed), 1);

        // A dispatcher with nothing to deliver never needs a runtime.
        let without_channels = verifier(audit.clone());
        assert!(without_channels.verify(signed(payload(NOW))).is_ok());
        assert_eq!(audit.count(AuditEventKind::DispatchFailed), 1);
        Ok(())
    }

    #[test]
    fn flipping_any_field_invalidates() {
        let audit = Arc::new(MemoryAuditSink::new());
        let verifier = verifier(audit.clone());
        let original = signed(payload(NOW));

        for (key, value) in [
            ("id", json!(43)),
            ("first_name", json!("Eve")),
            ("username", json!("eve")),
            ("auth_date", json!(NOW - 1)),
            ("photo_url", json!("https://t.me/i/userpic/320/x.jpg")),
        ] {
            let mut tampered = original.clone();
            tampered.insert(key.to_string(), value);
            assert_eq!(
                verifier.verify(tampered).err(),
                Some(WidgetRejection::BadSignature),
                "tampering with {key} must be caught"
            );
        }
        assert_eq!(audit.count(AuditEventKind::WidgetRejected), 5);
    }

    #[test]
    fn stale_payload_is_rejected_even_when_signed() {
        let audit = Arc::new(MemoryAuditSink::new());
        let verifier = verifier(audit);

        let stale = signed(payload(NOW - MAX_AUTH_AGE_SECONDS - 1));
        assert_eq!(verifier.verify(stale).err(), Some(WidgetRejection::Stale));

        let edge = signed(payload(NOW - MAX_AUTH_AGE_SECONDS));
        assert!(verifier.verify(edge).is_ok());
    }

    #[test]
    fn missing_and_malformed_fields_are_rejected() {
        let audit = Arc::new(MemoryAuditSink::new());
        let verifier = verifier(audit);

        for field in REQUIRED_FIELDS {
            let mut fields = signed(payload(NOW));
            fields.remove(field);
            assert_eq!(
                verifier.verify(fields).err(),
                Some(WidgetRejection::MissingField(field))
            );
        }

        let mut fields = signed(payload(NOW));
        fields.insert("auth_date".to_string(), json!("yesterday"));
        assert_eq!(
            verifier.verify(fields).err(),
            Some(WidgetRejection::InvalidField("auth_date"))
        );

        let mut fields = signed(payload(NOW));
        fields.insert("hash".to_string(), json!(12));
        assert_eq!(
            verifier.verify(fields).err(),
            Some(WidgetRejection::InvalidField("hash"))
        );
    }
}
