//! Result fan-out to delivery channels.
//!
//! Flow Overview:
//! 1) A store reaches a successful outcome and calls [`ResultDispatcher::dispatch`].
//! 2) The dispatcher spawns a detached task on the current tokio runtime; the
//!    caller's state change is already committed and never waits on delivery.
//!    With nothing configured no task is spawned. Outside a runtime the
//!    result is logged and audited as undeliverable.
//! 3) The task runs every enabled channel in turn, then the save hook.
//!    A failing channel is logged and audited; the remaining ones still run.
//!
//! Delivery is not transactional: a report with some failed channels is a
//! normal outcome.

pub mod channels;

use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::Url;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::error::ConfigError;
use crate::identity::Identity;

pub use self::channels::{
    Callback, RealtimeEmitter, ReqwestPoster, ResultPoster, SaveHandler,
};

/// Which flow produced an authenticated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultKind {
    #[serde(rename = "deeplink")]
    Deeplink,
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "widget")]
    Widget,
    #[serde(rename = "2fa")]
    TwoFactor,
}

impl ResultKind {
    /// Event name used on the real-time channel. Deeplinks and codes share one.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Deeplink | Self::Code => "auth_result",
            Self::Widget => "widget_auth",
            Self::TwoFactor => "2fa_verified",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deeplink => "deeplink",
            Self::Code => "code",
            Self::Widget => "widget",
            Self::TwoFactor => "2fa",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Callback,
    Rest,
    Websocket,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Callback => "callback",
            Self::Rest => "rest",
            Self::Websocket => "websocket",
        };
        f.write_str(name)
    }
}

/// An enabled delivery channel with the configuration it needs.
pub enum DeliveryChannel {
    Callback(Callback),
    Rest {
        endpoint: Url,
        poster: Arc<dyn ResultPoster>,
    },
    Websocket(Arc<dyn RealtimeEmitter>),
}

impl DeliveryChannel {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&Identity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }

    /// # Errors
    /// Returns an error if `endpoint` is not an absolute http(s) URL.
    pub fn rest(endpoint: &str, poster: Arc<dyn ResultPoster>) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|_| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
        validate_endpoint(&endpoint)?;
        Ok(Self::Rest { endpoint, poster })
    }

    pub fn websocket(emitter: Arc<dyn RealtimeEmitter>) -> Self {
        Self::Websocket(emitter)
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Callback(_) => ChannelKind::Callback,
            Self::Rest { .. } => ChannelKind::Rest,
            Self::Websocket(_) => ChannelKind::Websocket,
        }
    }

    async fn deliver(&self, kind: ResultKind, identity: &Identity) -> anyhow::Result<()> {
        match self {
            Self::Callback(callback) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(identity)))
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("callback panicked")))
            }
            Self::Rest { endpoint, poster } => poster.post(endpoint, identity).await,
            Self::Websocket(emitter) => {
                let payload = serde_json::to_value(identity)?;
                emitter.emit(kind.event_name(), &payload).await
            }
        }
    }
}

impl fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest { endpoint, .. } => f
                .debug_struct("Rest")
                .field("endpoint", &endpoint.as_str())
                .finish_non_exhaustive(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

fn validate_endpoint(endpoint: &Url) -> Result<(), ConfigError> {
    match endpoint.scheme() {
        "http" | "https" if endpoint.has_host() => Ok(()),
        _ => Err(ConfigError::InvalidEndpoint(endpoint.to_string())),
    }
}

/// Outcome of one dispatch, resolved on the detached task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: ResultKind,
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<(ChannelKind, String)>,
    /// `None` when no save handler is configured.
    pub saved: Option<bool>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.saved != Some(false)
    }
}

struct DispatcherInner {
    channels: Vec<DeliveryChannel>,
    save_handler: Option<Arc<dyn SaveHandler>>,
    audit: Arc<dyn AuditSink>,
}

/// Policy object shared by every store; cheap to clone.
#[derive(Clone)]
pub struct ResultDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ResultDispatcher {
    /// # Errors
    /// Returns an error if a channel kind appears twice or a REST endpoint is
    /// not http(s).
    pub fn new(
        channels: Vec<DeliveryChannel>,
        save_handler: Option<Arc<dyn SaveHandler>>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.kind()) {
                return Err(ConfigError::DuplicateChannel(channel.kind()));
            }
            if let DeliveryChannel::Rest { endpoint, .. } = channel {
                validate_endpoint(endpoint)?;
            }
        }
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                channels,
                save_handler,
                audit,
            }),
        })
    }

    /// Dispatcher with no channels and no save hook.
    #[must_use]
    pub fn disabled(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                channels: Vec::new(),
                save_handler: None,
                audit,
            }),
        }
    }

    #[must_use]
    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.inner.channels.iter().map(DeliveryChannel::kind).collect()
    }

    /// Deliver `identity` on a detached task.
    ///
    /// Returns `None` when no task was spawned: nothing is configured, or the
    /// caller is not inside a tokio runtime. Callers that only trigger
    /// delivery drop the handle; the report is there for hosts and tests that
    /// want to observe the outcome.
    pub fn dispatch(&self, kind: ResultKind, identity: Identity) -> Option<JoinHandle<DispatchReport>> {
        if self.inner.channels.is_empty() && self.inner.save_handler.is_none() {
            debug!(result = %kind, "no delivery channels configured");
            return None;
        }

        let Ok(runtime) = Handle::try_current() else {
            error!(result = %kind, "no async runtime available, result not delivered");
            self.inner.audit.record(
                AuditEvent::new(AuditEventKind::DispatchFailed)
                    .with_identity(&identity)
                    .with_metadata(json!({
                        "channel": "runtime",
                        "result": kind,
                        "error": "no async runtime available",
                    })),
            );
            return None;
        };

        let inner = Arc::clone(&self.inner);
        Some(runtime.spawn(async move { inner.deliver(kind, &identity).await }))
    }
}

impl DispatcherInner {
    async fn deliver(&self, kind: ResultKind, identity: &Identity) -> DispatchReport {
        let mut report = DispatchReport {
            kind,
            delivered: Vec::with_capacity(self.channels.len()),
            failed: Vec::new(),
            saved: None,
        };

        for channel in &self.channels {
            let channel_kind = channel.kind();
            match channel.deliver(kind, identity).await {
                Ok(()) => {
                    debug!(channel = %channel_kind, result = %kind, "result delivered");
                    report.delivered.push(channel_kind);
                }
                Err(err) => {
                    error!(channel = %channel_kind, result = %kind, "failed to deliver result: {err:#}");
                    self.audit.record(
                        AuditEvent::new(AuditEventKind::DispatchFailed)
                            .with_identity(identity)
                            .with_metadata(json!({
                                "channel": channel_kind,
                                "result": kind,
                                "error": err.to_string(),
                            })),
                    );
                    report.failed.push((channel_kind, err.to_string()));
                }
            }
        }

        if let Some(handler) = &self.save_handler {
            match handler.save(kind, identity).await {
                Ok(()) => report.saved = Some(true),
                Err(err) => {
                    error!(result = %kind, "save handler failed: {err:#}");
                    self.audit.record(
                        AuditEvent::new(AuditEventKind::DispatchFailed)
                            .with_identity(identity)
                            .with_metadata(json!({
                                "channel": "save",
                                "result": kind,
                                "error": err.to_string(),
                            })),
                    );
                    report.saved = Some(false);
                }
            }
        }

        report
    }
}

impl fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("channels", &self.inner.channels)
            .field("save_handler", &self.inner.save_handler.is_some())
            .finish_non_exhaustive()
    }
}
