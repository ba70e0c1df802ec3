//! Configure tracing subscribers, and write timestamped status lines.
//!
//! Two things live here.  [`setup_logging`] installs the console subscriber
//! that carries every `tracing` event the node emits.  [`LogSink`] is the
//! narrower channel a running node uses to report what it is doing (roles
//! enabled, descriptors installed) to its operator; the default sink,
//! [`timestamped_stdout`], prints each line with a `[YYYY-MM-DD HH:MM]`
//! prefix.

use std::io::IsTerminal as _;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::Targets, fmt, registry, Layer};

use crate::config::LoggingConfig;

mod time;

/// A place to send human-readable status lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Return `msg` with the current time, to the minute, in front of it.
pub fn timestamp_message(msg: &str) -> String {
    time::timestamped(msg, ::time::OffsetDateTime::now_utc())
}

/// Return a [`LogSink`] that prints each line to standard output with a
/// timestamp in front of it.
pub fn timestamped_stdout() -> LogSink {
    Arc::new(|msg: &str| {
        #[allow(clippy::print_stdout)]
        {
            println!("{}", timestamp_message(msg));
        }
    })
}

/// Return a [`LogSink`] that discards everything.
pub fn discard() -> LogSink {
    Arc::new(|_: &str| {})
}

/// As [`Targets::from_str`], but wrapped in an [`anyhow::Result`].
fn filt_from_str_verbose(s: &str, source: &str) -> Result<Targets> {
    Targets::from_str(s).with_context(|| format!("in {}", source))
}

/// Return the console filter to use: `cli` if present, else the
/// configured one.
fn console_filter(config: &LoggingConfig, cli: Option<&str>) -> Result<Targets> {
    match cli {
        Some(s) => filt_from_str_verbose(s, "--log-level command line parameter"),
        None => filt_from_str_verbose(&config.console, "logging.console"),
    }
}

/// Try to construct a tracing [`Layer`] for logging to stderr.
fn console_layer<S>(config: &LoggingConfig, cli: Option<&str>) -> Result<impl Layer<S>>
where
    S: Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let filter = console_filter(config, cli)?;
    let use_color = std::io::stderr().is_terminal();
    Ok(fmt::Layer::default()
        .with_ansi(use_color)
        .with_timer(time::LogTimer)
        .with_writer(std::io::stderr) // we make this explicit, to match with use_color.
        .with_filter(filter))
}

/// Set up logging.
///
/// `cli`, if present, is a filter given on the command line; it replaces
/// the one in `config`.
pub fn setup_logging(config: &LoggingConfig, cli: Option<&str>) -> Result<()> {
    registry()
        .with(console_layer(config, cli)?)
        .try_init()
        .context("Unable to install the log subscriber")
}
