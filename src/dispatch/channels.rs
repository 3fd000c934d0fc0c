//! Delivery capabilities injected into the dispatcher.
//!
//! The dispatcher never talks to the network itself: each remote channel calls
//! through one of these traits so the transport stays outside the core.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::ResultKind;
use crate::identity::Identity;

const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process callback invoked with the authenticated identity.
pub type Callback = Arc<dyn Fn(&Identity) -> Result<()> + Send + Sync>;

/// Outbound HTTP delivery of a result.
#[async_trait]
pub trait ResultPoster: Send + Sync {
    /// POST the identity as a JSON body to `endpoint`.
    async fn post(&self, endpoint: &Url, identity: &Identity) -> Result<()>;
}

/// Handle on a real-time messaging connection (socket server, pub/sub, ...).
#[async_trait]
pub trait RealtimeEmitter: Send + Sync {
    async fn emit(&self, event: &str, payload: &Value) -> Result<()>;
}

/// Hook attempted on every dispatch, regardless of the enabled channels.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(&self, kind: ResultKind, identity: &Identity) -> Result<()>;
}

/// [`ResultPoster`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestPoster {
    client: Client,
}

impl ReqwestPoster {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_POST_TIMEOUT)
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResultPoster for ReqwestPoster {
    #[instrument(skip(self, identity), fields(identity_id = %identity.id))]
    async fn post(&self, endpoint: &Url, identity: &Identity) -> Result<()> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(identity)
            .send()
            .await
            .with_context(|| format!("failed to POST result to {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{endpoint} - {status}"));
        }

        debug!("result delivered to {endpoint}");
        Ok(())
    }
}
