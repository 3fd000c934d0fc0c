use clap::{Arg, ArgGroup, ArgMatches, Command};

use crate::config::ENV_SESSION_TTL_SECONDS;

pub const CMD_SESSIONS: &str = "sessions";
pub const CMD_LIST: &str = "list";
pub const CMD_SWEEP: &str = "sweep";
pub const CMD_REVOKE: &str = "revoke";
pub const ARG_STORE: &str = "store";
pub const ARG_DSN: &str = "dsn";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_IDENTITY: &str = "identity";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub store: Option<String>,
    pub dsn: Option<String>,
    pub session_ttl_seconds: i64,
}

impl Options {
    /// Parse the backend selection shared by every `sessions` subcommand.
    ///
    /// # Errors
    /// Returns an error if neither `--store` nor `--dsn` is set.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let store = read(ARG_STORE);
        let dsn = read(ARG_DSN);
        if store.is_none() && dsn.is_none() {
            anyhow::bail!("missing required argument: --{ARG_STORE} or --{ARG_DSN}");
        }

        Ok(Self {
            store,
            dsn,
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(30 * 24 * 60 * 60),
        })
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(CMD_SESSIONS)
        .about("Inspect and maintain persisted sessions")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_STORE)
                .long(ARG_STORE)
                .help("Path to a JSON session snapshot")
                .env("BOTAUTH_SESSION_STORE")
                .global(true),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Postgres connection string holding the auth_sessions table")
                .env("BOTAUTH_DSN")
                .global(true),
        )
        .group(ArgGroup::new("backend").args([ARG_STORE, ARG_DSN]).multiple(false))
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds, measured from the last activity")
                .env(ENV_SESSION_TTL_SECONDS)
                .default_value("2592000")
                .global(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .subcommand(
            Command::new(CMD_LIST)
                .about("List live sessions")
                .arg(
                    Arg::new(ARG_IDENTITY)
                        .long(ARG_IDENTITY)
                        .help("Only list sessions of this identity id"),
                ),
        )
        .subcommand(Command::new(CMD_SWEEP).about("Remove expired sessions"))
        .subcommand(
            Command::new(CMD_REVOKE)
                .about("Delete every session of an identity")
                .arg(
                    Arg::new(ARG_IDENTITY)
                        .long(ARG_IDENTITY)
                        .help("Identity id whose sessions are deleted")
                        .required(true),
                ),
        )
}
