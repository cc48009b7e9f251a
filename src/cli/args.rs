//! CLI argument parsing using clap.

use clap::{
    ArgAction, Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "adaapd", version)]
#[command(about = "Watch a media library and report file changes as they happen")]
#[command(styles = clap_cargo_style())]
pub struct Cli {
    /// Settings file to use instead of the discovered .adaapd/settings.toml
    #[arg(long, global = true, env = "ADAAPD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write default settings to .adaapd/settings.toml
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Watch a directory tree and print NEW/CHG/REM lines until Ctrl-C
    Watch(WatchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Directory to watch (overrides watch.root)
    pub root: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    pub json: bool,

    /// Ignore entries starting with this prefix (overrides watch.hidden_prefix)
    #[arg(long, value_name = "PREFIX")]
    pub hidden_prefix: Option<String>,

    /// Read buffer capacity in events (overrides watch.buffer_events)
    #[arg(long, value_name = "EVENTS")]
    pub buffer_events: Option<usize>,
}

impl Cli {
    /// Log level implied by `-v` flags, if any were given.
    pub fn verbosity_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }
}
