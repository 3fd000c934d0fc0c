use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::clock::{Clock, SystemClock};
use crate::config::{lifetime_from_seconds, SessionConfig};
use crate::session::{
    uuid_id_generator, JsonFilePersistence, PgSessionPersistence, SessionPersistence, SessionStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    File(PathBuf),
    Postgres(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List { identity: Option<String> },
    Sweep,
    Revoke { identity: String },
}

#[derive(Debug)]
pub struct Args {
    pub backend: Backend,
    pub session_ttl_seconds: i64,
    pub command: Command,
}

/// # Errors
/// Returns an error if the backend is unreachable or the snapshot cannot be saved.
pub async fn execute(args: Args) -> Result<()> {
    let persistence: Arc<dyn SessionPersistence> = match &args.backend {
        Backend::File(path) => Arc::new(JsonFilePersistence::new(path.clone())),
        Backend::Postgres(dsn) => {
            let pg = PgSessionPersistence::connect(dsn).await?;
            pg.ensure_schema().await?;
            Arc::new(pg)
        }
    };

    let output = run(&args, persistence, Arc::new(SystemClock)).await?;
    println!("{output}");
    Ok(())
}

async fn run(args: &Args, persistence: Arc<dyn SessionPersistence>, clock: Arc<dyn Clock>) -> Result<String> {
    let lifetime = lifetime_from_seconds(args.session_ttl_seconds).with_context(|| {
        format!("session lifetime of {} seconds is out of range", args.session_ttl_seconds)
    })?;
    let config = SessionConfig::new().with_lifetime(lifetime).validate()?;
    let store = SessionStore::open(
        config,
        uuid_id_generator(),
        persistence,
        Arc::new(TracingAuditSink),
        clock,
    )
    .await;

    match &args.command {
        Command::List { identity } => {
            let sessions = match identity {
                Some(identity) => store.list_for_identity(identity).await,
                None => store.list().await,
            };
            serde_json::to_string_pretty(&sessions).context("failed to encode sessions")
        }
        Command::Sweep => {
            let removed = store.sweep().await;
            store.persist_now().await?;
            info!(removed, "sweep complete");
            Ok(format!("removed {removed} expired session(s)"))
        }
        Command::Revoke { identity } => {
            let removed = store.clear_for_identity(identity).await;
            store.persist_now().await?;
            info!(removed, identity = %identity, "sessions revoked");
            Ok(format!("revoked {removed} session(s) of {identity}"))
        }
    }
}
