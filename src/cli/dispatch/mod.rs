//! Map validated CLI matches to an [`Action`].

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use crate::cli::actions::{
    sessions::{self, Backend},
    widget, Action,
};
use crate::cli::commands::{
    sessions::{self as sessions_cmd, CMD_LIST, CMD_REVOKE, CMD_SESSIONS, CMD_SWEEP},
    widget::{self as widget_cmd, CMD_VERIFY, CMD_WIDGET},
};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_WIDGET, widget_matches)) => match widget_matches.subcommand() {
            Some((CMD_VERIFY, verify_matches)) => {
                let options = widget_cmd::Options::parse(verify_matches)?;
                Ok(Action::WidgetVerify(widget::Args {
                    bot_token: options.bot_token,
                    bot_username: options.bot_username,
                    payload: options.payload,
                }))
            }
            _ => Err(anyhow!("missing widget subcommand")),
        },
        Some((CMD_SESSIONS, sessions_matches)) => {
            let (name, leaf) = sessions_matches
                .subcommand()
                .context("missing sessions subcommand")?;
            let options = sessions_cmd::Options::parse(leaf)?;
            let backend = match (options.store, options.dsn) {
                (Some(path), _) => Backend::File(PathBuf::from(path)),
                (None, Some(dsn)) => Backend::Postgres(dsn),
                (None, None) => return Err(anyhow!("missing required argument: --store or --dsn")),
            };

            let identity = leaf.get_one::<String>(sessions_cmd::ARG_IDENTITY).cloned();
            let command = match name {
                CMD_LIST => sessions::Command::List { identity },
                CMD_SWEEP => sessions::Command::Sweep,
                CMD_REVOKE => sessions::Command::Revoke {
                    identity: identity.context("missing required argument: --identity")?,
                },
                other => return Err(anyhow!("unknown sessions subcommand: {other}")),
            };

            Ok(Action::Sessions(sessions::Args {
                backend,
                session_ttl_seconds: options.session_ttl_seconds,
                command,
            }))
        }
        _ => Err(anyhow!("missing subcommand")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("BOTAUTH_BOT_TOKEN", None::<&str>),
                ("BOTAUTH_BOT_USERNAME", None::<&str>),
                ("BOTAUTH_SESSION_STORE", None::<&str>),
                ("BOTAUTH_DSN", None::<&str>),
                ("BOTAUTH_SESSION_TTL_SECONDS", None::<&str>),
            ],
            f,
        );
    }

    #[test]
    fn sessions_revoke_maps_to_action() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "botauth",
                "sessions",
                "--dsn",
                "postgres://localhost/botauth",
                "revoke",
                "--identity",
                "42",
            ]);
            let action = handler(&matches);
            assert!(action.is_ok());
            if let Ok(Action::Sessions(args)) = action {
                assert_eq!(args.backend, Backend::Postgres("postgres://localhost/botauth".to_string()));
                assert_eq!(
                    args.command,
                    sessions::Command::Revoke {
                        identity: "42".to_string()
                    }
                );
                assert_eq!(args.session_ttl_seconds, 2_592_000);
            }
        });
    }

    #[test]
    fn widget_without_token_is_rejected() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "botauth",
                "widget",
                "verify",
                "--bot-username",
                "login_bot",
                "--payload",
                "{}",
            ]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("missing required argument: --bot-token"));
            }
        });
    }

    #[test]
    fn sessions_list_uses_file_backend() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "botauth",
                "sessions",
                "list",
                "--store",
                "/var/lib/botauth/sessions.json",
            ]);
            let action = handler(&matches);
            assert!(matches!(
                action,
                Ok(Action::Sessions(sessions::Args {
                    backend: Backend::File(_),
                    command: sessions::Command::List { identity: None },
                    ..
                }))
            ));
        });
    }
}
