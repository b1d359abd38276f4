//! Client option parsing.
//!
//! The client forwards its command line to the remote interpreter verbatim,
//! so its own options live in a separate namespace: any argument starting
//! with `-C` belongs to the client (`-Cport 2000`, `-Cenv-all`, …) and is
//! removed before the rest is sent as `Arg` headers. The extracted options are
//! rewritten to long flags and parsed with clap.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::{AppError, Result};

/// Prefix marking an argument as a client option.
pub const CLIENT_OPTION_PREFIX: &str = "-C";

/// Known client options: name after the prefix, clap long flag, takes a value.
const KNOWN_OPTIONS: &[(&str, &str, bool)] = &[
    ("without-invoking-server", "without-invoking-server", false),
    ("p", "port", true),
    ("port", "port", true),
    ("env", "env", true),
    ("env-all", "env-all", false),
    ("env-exclude", "env-exclude", true),
    ("config", "config", true),
    ("log-format", "log-format", true),
];

/// Diagnostic log output format.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Options addressed to the client itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(name = "interpc", no_binary_name = true, disable_help_flag = true)]
pub struct ClientOptions {
    /// Only report whether the server is running (exit 0 if up, 9 if down).
    #[arg(long = "without-invoking-server")]
    pub without_invoking_server: bool,

    /// Server port, overriding `INTERP_SERVER_PORT` and the config file.
    #[arg(long)]
    pub port: Option<u16>,

    /// Forward environment variables whose name contains this text.
    #[arg(long = "env")]
    pub env_include: Vec<String>,

    /// Forward every environment variable.
    #[arg(long = "env-all")]
    pub env_all: bool,

    /// Never forward environment variables whose name contains this text.
    #[arg(long = "env-exclude")]
    pub env_exclude: Vec<String>,

    /// Configuration file (defaults to `INTERP_CLIENT_CONFIG`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Diagnostic log format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// A command line split into client options and pass-through arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Parsed client options.
    pub options: ClientOptions,
    /// Arguments for the remote interpreter, in command-line order.
    pub args: Vec<String>,
    /// `-C` options that were not recognised and were dropped.
    pub ignored: Vec<String>,
}

/// Split `argv` (without the program name) into client options and
/// interpreter arguments.
///
/// # Errors
///
/// Returns `AppError::Config` when a known option is missing its parameter
/// or clap rejects a value (for example a non-numeric port).
pub fn parse_invocation<I>(argv: I) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut flags = Vec::new();
    let mut args = Vec::new();
    let mut ignored = Vec::new();
    let mut argv = argv.into_iter();

    while let Some(arg) = argv.next() {
        let Some(name) = arg.strip_prefix(CLIENT_OPTION_PREFIX) else {
            args.push(arg);
            continue;
        };

        let Some(&(_, long, takes_value)) = KNOWN_OPTIONS.iter().find(|(n, _, _)| *n == name)
        else {
            ignored.push(arg);
            continue;
        };

        if takes_value {
            let value = argv.next().ok_or_else(|| {
                AppError::Config(format!("option {arg} requires a parameter"))
            })?;
            flags.push(format!("--{long}={value}"));
        } else {
            flags.push(format!("--{long}"));
        }
    }

    let options = ClientOptions::try_parse_from(flags)
        .map_err(|err| AppError::Config(format!("invalid client option: {err}")))?;

    Ok(Invocation {
        options,
        args,
        ignored,
    })
}
