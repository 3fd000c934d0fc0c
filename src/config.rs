//! Engine configuration.
//!
//! All knobs live in one required [`AuthConfig`]. Provider credentials are
//! checked at construction so a misconfigured process fails at startup rather
//! than on the first login.

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

const DEFAULT_ARTIFACT_CODE_LENGTH: usize = 8;
const DEFAULT_CHALLENGE_CODE_LENGTH: usize = 6;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Upper bound for any configured lifetime (100 years).
pub(crate) const MAX_LIFETIME_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;
pub(crate) const MAX_CODE_LENGTH: usize = 64;

pub const ENV_BOT_TOKEN: &str = "BOTAUTH_BOT_TOKEN";
pub const ENV_BOT_USERNAME: &str = "BOTAUTH_BOT_USERNAME";
pub const ENV_SESSION_TTL_SECONDS: &str = "BOTAUTH_SESSION_TTL_SECONDS";
pub const ENV_CODE_TTL_SECONDS: &str = "BOTAUTH_CODE_TTL_SECONDS";
pub const ENV_MAX_ATTEMPTS: &str = "BOTAUTH_MAX_ATTEMPTS";
pub const ENV_ARTIFACT_TTL_SECONDS: &str = "BOTAUTH_ARTIFACT_TTL_SECONDS";

/// Expiry and shape of deeplink tokens and login codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArtifactPolicy {
    lifetime: Option<Duration>,
    code_length: usize,
}

impl ArtifactPolicy {
    /// Artifacts never expire and login codes are 8 digits long.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifetime: None,
            code_length: DEFAULT_ARTIFACT_CODE_LENGTH,
        }
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    #[must_use]
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    #[must_use]
    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    /// # Errors
    /// Returns an error for an out-of-range code length or a lifetime that is
    /// not positive or longer than 100 years.
    pub fn validate(self) -> Result<Self, ConfigError> {
        validate_code_length(self.code_length)?;
        if let Some(lifetime) = self.lifetime {
            validate_lifetime("artifact", lifetime)?;
        }
        Ok(self)
    }
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-factor challenge settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChallengeConfig {
    code_length: usize,
    code_lifetime: Duration,
    max_attempts: u32,
}

impl ChallengeConfig {
    /// 6 digit codes, valid for 5 minutes, 3 attempts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_length: DEFAULT_CHALLENGE_CODE_LENGTH,
            code_lifetime: Duration::seconds(DEFAULT_CHALLENGE_TTL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    #[must_use]
    pub fn with_code_lifetime(mut self, code_lifetime: Duration) -> Self {
        self.code_lifetime = code_lifetime;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn code_lifetime(&self) -> Duration {
        self.code_lifetime
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// # Errors
    /// Returns an error for an out-of-range code length, a lifetime outside
    /// `(0, 100 years]`, or zero attempts.
    pub fn validate(self) -> Result<Self, ConfigError> {
        validate_code_length(self.code_length)?;
        validate_lifetime("challenge", self.code_lifetime)?;
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(self)
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Session lifetime (sliding window measured from the last activity).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    lifetime: Duration,
}

impl SessionConfig {
    /// Sessions live 30 days past their last activity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifetime: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// # Errors
    /// Returns an error when the lifetime is not positive or exceeds 100 years.
    pub fn validate(self) -> Result<Self, ConfigError> {
        validate_lifetime("session", self.lifetime)?;
        Ok(self)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity-provider credentials plus per-component settings.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    bot_token: SecretString,
    bot_username: String,
    artifacts: ArtifactPolicy,
    challenge: ChallengeConfig,
    session: SessionConfig,
}

impl AuthConfig {
    /// Build a config with default component settings.
    ///
    /// A leading `@` on the username is dropped.
    ///
    /// # Errors
    /// Returns an error if the bot token or the bot username is empty.
    pub fn new(bot_token: SecretString, bot_username: &str) -> Result<Self, ConfigError> {
        if bot_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingBotToken);
        }
        let bot_username = bot_username.trim().trim_start_matches('@');
        if bot_username.is_empty() {
            return Err(ConfigError::MissingBotUsername);
        }
        Ok(Self {
            bot_token,
            bot_username: bot_username.to_string(),
            artifacts: ArtifactPolicy::new(),
            challenge: ChallengeConfig::new(),
            session: SessionConfig::new(),
        })
    }

    /// # Errors
    /// Returns an error if the policy is invalid.
    pub fn with_artifacts(mut self, artifacts: ArtifactPolicy) -> Result<Self, ConfigError> {
        self.artifacts = artifacts.validate()?;
        Ok(self)
    }

    /// # Errors
    /// Returns an error if the challenge settings are invalid.
    pub fn with_challenge(mut self, challenge: ChallengeConfig) -> Result<Self, ConfigError> {
        self.challenge = challenge.validate()?;
        Ok(self)
    }

    /// # Errors
    /// Returns an error if the session settings are invalid.
    pub fn with_session(mut self, session: SessionConfig) -> Result<Self, ConfigError> {
        self.session = session.validate()?;
        Ok(self)
    }

    #[must_use]
    pub fn bot_token(&self) -> &SecretString {
        &self.bot_token
    }

    #[must_use]
    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    #[must_use]
    pub fn artifacts(&self) -> ArtifactPolicy {
        self.artifacts
    }

    #[must_use]
    pub fn challenge(&self) -> ChallengeConfig {
        self.challenge
    }

    #[must_use]
    pub fn session(&self) -> SessionConfig {
        self.session
    }

    /// Load the configuration from `BOTAUTH_*` environment variables.
    ///
    /// # Errors
    /// Returns an error when credentials are missing or a numeric variable
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var(ENV_BOT_TOKEN).unwrap_or_default();
        let username = std::env::var(ENV_BOT_USERNAME).unwrap_or_default();
        let mut config = Self::new(SecretString::from(token), &username)?;

        if let Some(lifetime) = parse_lifetime_env(ENV_SESSION_TTL_SECONDS)? {
            config = config.with_session(SessionConfig::new().with_lifetime(lifetime))?;
        }

        let mut challenge = ChallengeConfig::new();
        if let Some(lifetime) = parse_lifetime_env(ENV_CODE_TTL_SECONDS)? {
            challenge = challenge.with_code_lifetime(lifetime);
        }
        if let Some(attempts) = parse_env::<u32>(ENV_MAX_ATTEMPTS)? {
            challenge = challenge.with_max_attempts(attempts);
        }
        config = config.with_challenge(challenge)?;

        if let Some(lifetime) = parse_lifetime_env(ENV_ARTIFACT_TTL_SECONDS)? {
            config = config.with_artifacts(ArtifactPolicy::new().with_lifetime(lifetime))?;
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        _ => Ok(None),
    }
}

/// Seconds from `key` as a [`Duration`]; values chrono cannot represent are
/// reported like any other unparsable value.
fn parse_lifetime_env(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(seconds) = parse_env::<i64>(key)? else {
        return Ok(None);
    };
    lifetime_from_seconds(seconds)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidEnv {
            key,
            value: seconds.to_string(),
        })
}

/// `None` when `seconds` is outside what a [`Duration`] can hold.
#[must_use]
pub fn lifetime_from_seconds(seconds: i64) -> Option<Duration> {
    Duration::try_seconds(seconds)
}

fn validate_code_length(code_length: usize) -> Result<(), ConfigError> {
    if code_length == 0 || code_length > MAX_CODE_LENGTH {
        return Err(ConfigError::InvalidCodeLength(code_length));
    }
    Ok(())
}

fn validate_lifetime(what: &'static str, lifetime: Duration) -> Result<(), ConfigError> {
    if lifetime <= Duration::zero() {
        return Err(ConfigError::NonPositiveLifetime(what));
    }
    if lifetime > Duration::seconds(MAX_LIFETIME_SECONDS) {
        return Err(ConfigError::LifetimeTooLong(what));
    }
    Ok(())
}
