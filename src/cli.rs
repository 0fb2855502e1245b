use std::{collections::HashMap, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::{config::DEFAULT_CONFIG_FILE, render::DEFAULT_TEMPLATE};

const BOT_BUILD_INFO: &str = env!("BOT_BUILD_INFO");

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum CommandArgs {
    /// Read chat messages from stdin, one per line, and answer on stdout
    Console {
        /// Maximum number of messages handled at once
        #[arg(long, default_value = "8", value_name = "NUM")]
        max_in_flight: usize,
    },

    /// Run a single action and print its response
    Dispatch {
        /// Action id, e.g. list-prs or list-prs-without-approvals
        action: String,

        /// Request parameter (can specify multiple)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Response template id
        #[arg(short = 't', long, default_value = DEFAULT_TEMPLATE, value_name = "ID")]
        template: String,

        /// Channel reported in the response
        #[arg(long, default_value = "cli", value_name = "NAME")]
        channel: String,
    },

    /// List the registered actions
    Actions,
}

#[derive(Parser, Debug)]
#[command(
    name = "rootinha-bot",
    about = "Chat bot that answers pull request questions from GitHub"
)]
#[command(long_version = BOT_BUILD_INFO)]
struct CliArgs {
    /// Settings file (.yaml, .yml or .json)
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<CommandArgs>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Console {
        max_in_flight: usize,
    },
    Dispatch {
        action: String,
        params: HashMap<String, String>,
        template: String,
        channel: String,
    },
    Actions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config: PathBuf,
    pub debug: bool,
    pub mode: Mode,
}

/// Parses command-line arguments. With no subcommand the console
/// transport runs.
pub fn parse_args<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = CliArgs::try_parse_from(args)?;

    let mode = match cli.command {
        None => Mode::Console { max_in_flight: 8 },
        Some(CommandArgs::Console { max_in_flight }) => {
            if max_in_flight == 0 {
                anyhow::bail!("--max-in-flight must be at least 1");
            }
            Mode::Console { max_in_flight }
        }
        Some(CommandArgs::Dispatch {
            action,
            params,
            template,
            channel,
        }) => Mode::Dispatch {
            action,
            // Later values win for repeated keys.
            params: params.into_iter().collect(),
            template,
            channel,
        },
        Some(CommandArgs::Actions) => Mode::Actions,
    };

    Ok(Invocation {
        config: cli.config,
        debug: cli.debug,
        mode,
    })
}
