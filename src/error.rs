//! Construction-time errors.
//!
//! Validation outcomes (used artifacts, wrong codes, bad signatures) are not
//! errors; they surface as `false` or as [`crate::widget::WidgetRejection`].

use crate::dispatch::ChannelKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing bot token")]
    MissingBotToken,
    #[error("missing bot username")]
    MissingBotUsername,
    #[error("invalid code length {0}: expected 1..=64 digits")]
    InvalidCodeLength(usize),
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
    #[error("{0} lifetime must be positive")]
    NonPositiveLifetime(&'static str),
    #[error("{0} lifetime must not exceed 100 years")]
    LifetimeTooLong(&'static str),
    #[error("invalid REST endpoint {0}: only http and https are supported")]
    InvalidEndpoint(String),
    #[error("delivery channel {0} configured more than once")]
    DuplicateChannel(ChannelKind),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}
