//! `-v` / `BOTAUTH_LOG_LEVEL` handling.
//!
//! Both resolve to a verbosity count that `start` turns into the default
//! tracing directive:
//!
//! | count | name    | level |
//! |-------|---------|-------|
//! | 0     | `error` | ERROR |
//! | 1     | `warn`  | WARN  |
//! | 2     | `info`  | INFO  |
//! | 3     | `debug` | DEBUG |
//! | 4, 5  | `trace` | TRACE |

use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ENV_LOG_LEVEL: &str = "BOTAUTH_LOG_LEVEL";

const MAX_VERBOSITY: u8 = 5;

const LEVEL_NAMES: [(&str, u8); 5] = [
    ("error", 0),
    ("warn", 1),
    ("info", 2),
    ("debug", 3),
    ("trace", 4),
];

/// Parse a level given as a count (`0..=5`) or a case-insensitive name.
fn parse_log_level(level: &str) -> Result<u8, String> {
    let level = level.trim();
    if let Ok(count) = level.parse::<u8>() {
        return if count <= MAX_VERBOSITY {
            Ok(count)
        } else {
            Err(format!("log level {count} is above {MAX_VERBOSITY}"))
        };
    }

    let lowered = level.to_ascii_lowercase();
    LEVEL_NAMES
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, count)| *count)
        .ok_or_else(|| format!("invalid log level '{level}': expected error, warn, info, debug or trace"))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_log_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log verbosity, repeat for more: -v WARN, -vv INFO, -vvv DEBUG, -vvvv TRACE (default: ERROR)")
            .env(ENV_LOG_LEVEL)
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
