use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::audit::TracingAuditSink;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::dispatch::ResultDispatcher;
use crate::identity::Identity;
use crate::widget::SignatureVerifier;

#[derive(Debug)]
pub struct Args {
    pub bot_token: SecretString,
    pub bot_username: String,
    /// JSON object, or `-` for stdin.
    pub payload: String,
}

/// Verify the payload and print the identity as JSON.
///
/// # Errors
/// Returns an error if the payload cannot be read or is rejected.
pub async fn execute(args: Args) -> Result<()> {
    let raw = if args.payload == "-" {
        let mut buffer = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buffer)
            .await
            .context("failed to read payload from stdin")?;
        buffer
    } else {
        args.payload.clone()
    };

    let identity = verify(&args, &raw, Arc::new(SystemClock))?;
    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

fn verify(args: &Args, raw: &str, clock: Arc<dyn Clock>) -> Result<Identity> {
    let payload: Map<String, Value> =
        serde_json::from_str(raw.trim()).context("payload must be a JSON object")?;

    let config = AuthConfig::new(args.bot_token.clone(), &args.bot_username)?;
    let audit = Arc::new(TracingAuditSink);
    let verifier = SignatureVerifier::new(
        &config,
        ResultDispatcher::disabled(audit.clone()),
        audit,
        clock,
    );

    verifier
        .verify(payload)
        .map_err(|rejection| anyhow!("widget payload rejected: {rejection}"))
}
