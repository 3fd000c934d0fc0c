//! # botauth (login artifacts, 2FA challenges and sessions)
//!
//! `botauth` issues and verifies short-lived authentication artifacts tied to a
//! chat-bot identity provider and keeps the sessions minted after a successful
//! verification.
//!
//! ## Entry points
//!
//! - [`artifact::ArtifactStore`]: single-use deeplink tokens and numeric codes.
//! - [`challenge::ChallengeStore`]: per-subject two-factor codes with expiry and
//!   a bounded number of verification attempts.
//! - [`widget::SignatureVerifier`]: HMAC validation of login-widget payloads.
//!
//! Every entry point ends at the [`dispatch::ResultDispatcher`], which fans the
//! authenticated [`identity::Identity`] out to the configured delivery channels.
//! A channel failing never undoes the state change that produced the result.
//!
//! ## Sessions
//!
//! [`session::SessionStore`] is driven by the host after a successful result.
//! The in-memory map is the source of truth; the persistence adapter is a
//! best-effort mirror that is only read at startup.
//!
//! ## Audit
//!
//! Each state transition is reported to an injected [`audit::AuditSink`].

pub mod artifact;
pub mod audit;
pub mod challenge;
pub mod cli;
pub mod clock;
pub mod codes;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod session;
pub mod widget;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
