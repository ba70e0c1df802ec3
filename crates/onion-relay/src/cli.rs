use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use onion_relay::sources::{default_config_file, ConfigSources};

/// Configure and check an onion-routing node.
#[derive(Clone, Debug, Parser)]
#[command(author = "The onion-relay developers")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    /// Override the log level from the configuration.
    #[arg(long, short, global = true)]
    #[arg(value_name = "LEVEL")]
    pub(crate) log_level: Option<LogLevel>,

    /// Override config file parameters, using TOML-like syntax.
    #[arg(long = "option", short, global = true)]
    #[arg(value_name = "KEY=VALUE")]
    pub(crate) options: Vec<String>,

    /// Config file(s) or directories of `.toml` files to read.
    ///
    /// If none are given, the default configuration file is read if it
    /// exists.
    #[arg(long, short, global = true)]
    #[arg(value_name = "FILE")]
    pub(crate) config: Vec<PathBuf>,
}

impl Cli {
    /// Return the configuration sources named on this command line.
    pub(crate) fn config_sources(&self) -> ConfigSources {
        ConfigSources::from_cmdline(default_config_file(), &self.config, &self.options)
    }
}

/// Main subcommands.
#[derive(Clone, Debug, Subcommand)]
pub(crate) enum Commands {
    /// Start the node: report its roles, and publish its descriptor.
    Run(RunArgs),
    /// Say whether the configured exit policy allows a destination.
    CheckExit(CheckExitArgs),
    /// Print the configuration as it was resolved, in TOML.
    ShowConfig,
}

/// Arguments when running a node.
#[derive(Clone, Debug, Args)]
pub(crate) struct RunArgs {
    /// TOML file holding this node's keys and descriptor signature.
    ///
    /// Without one, no descriptor is published.
    #[arg(long, value_name = "FILE")]
    pub(crate) keys: Option<PathBuf>,
}

/// Arguments for checking one destination against the exit policy.
#[derive(Clone, Debug, Args)]
pub(crate) struct CheckExitArgs {
    /// Destination address (IPv4 or IPv6).
    pub(crate) addr: IpAddr,
    /// Destination port.
    pub(crate) port: u16,
}

/// Log levels allowed by the cli.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}
