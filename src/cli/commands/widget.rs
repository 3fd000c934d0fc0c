use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::config::{ENV_BOT_TOKEN, ENV_BOT_USERNAME};

pub const CMD_WIDGET: &str = "widget";
pub const CMD_VERIFY: &str = "verify";
pub const ARG_PAYLOAD: &str = "payload";
pub const ARG_BOT_TOKEN: &str = "bot-token";
pub const ARG_BOT_USERNAME: &str = "bot-username";

#[derive(Debug, Clone)]
pub struct Options {
    pub bot_token: SecretString,
    pub bot_username: String,
    pub payload: String,
}

impl Options {
    /// Parse `widget verify` arguments.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            bot_token: SecretString::from(read_required(ARG_BOT_TOKEN)?),
            bot_username: read_required(ARG_BOT_USERNAME)?,
            payload: read_required(ARG_PAYLOAD)?,
        })
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(CMD_WIDGET)
        .about("Login widget payloads")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new(ARG_BOT_TOKEN)
                .long(ARG_BOT_TOKEN)
                .help("Bot token the widget payloads are signed with")
                .env(ENV_BOT_TOKEN)
                .hide_env_values(true)
                .global(true),
        )
        .arg(
            Arg::new(ARG_BOT_USERNAME)
                .long(ARG_BOT_USERNAME)
                .help("Bot username, with or without the leading @")
                .env(ENV_BOT_USERNAME)
                .global(true),
        )
        .subcommand(
            Command::new(CMD_VERIFY)
                .about("Verify a signed widget payload and print the identity")
                .arg(
                    Arg::new(ARG_PAYLOAD)
                        .long(ARG_PAYLOAD)
                        .help("Payload as a JSON object, or - to read it from stdin")
                        .required(true),
                ),
        )
}
