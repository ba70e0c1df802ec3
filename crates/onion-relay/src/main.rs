//! A command-line front end for configuring an onion-routing node.
//!
//! `onion-relay run` loads the node's options, reports which roles are
//! enabled, and (given a key file) builds and installs the node's
//! descriptor.  `check-exit` asks the configured exit policy about one
//! destination, and `show-config` prints the options as they were
//! resolved.

mod cli;

use std::fs;
use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use onion_relay::config::{NodeOptions, Role};
use onion_relay::logging::{discard, setup_logging, timestamped_stdout};
use onion_relay::{LocalKeys, OnionRelay};
use tracing::{info, warn};

fn main() {
    // Will exit if '--help' used or there's a parse error.
    let cli = cli::Cli::parse();

    if let Err(e) = main_main(cli) {
        tor_error::report_and_exit(e)
    }
}

/// The real main without the error formatting.
fn main_main(cli: cli::Cli) -> anyhow::Result<()> {
    let options = cli
        .config_sources()
        .load()
        .context("Failed to load configuration")?;

    let log_level = cli.log_level.map(|l| l.to_string());
    match cli.command {
        cli::Commands::ShowConfig => show_config(&options)?,
        cli::Commands::CheckExit(args) => {
            setup_logging(&options.logging, log_level.as_deref())?;
            check_exit(options, args)?;
        }
        cli::Commands::Run(args) => {
            setup_logging(&options.logging, log_level.as_deref())?;
            run(options, args)?;
        }
    }

    Ok(())
}

/// Print `options` as TOML.
#[allow(clippy::print_stdout)]
fn show_config(options: &NodeOptions) -> anyhow::Result<()> {
    let text = toml::to_string(options).context("Failed to encode configuration")?;
    print!("{}", text);
    Ok(())
}

/// Report what the exit policy would do with one destination.
#[allow(clippy::print_stdout)]
fn check_exit(options: NodeOptions, args: cli::CheckExitArgs) -> anyhow::Result<()> {
    let relay = OnionRelay::new(options, discard()).context("Failed to set up node")?;
    if !relay.has_role(Role::Exit) {
        warn!("This node is not an exit; every destination is rejected.");
    }
    let decision = relay.decide_exit(&args.addr, args.port);
    println!("{} {}", decision, SocketAddr::new(args.addr, args.port));
    Ok(())
}

/// Start the node, and publish its descriptor if we have keys.
fn run(options: NodeOptions, args: cli::RunArgs) -> anyhow::Result<()> {
    let relay = OnionRelay::new(options, timestamped_stdout()).context("Failed to start node")?;

    if relay.roles().is_empty() {
        warn!("Nothing to do: no role is enabled in the configuration.");
        return Ok(());
    }

    match (args.keys, relay.publishes()) {
        (Some(path), true) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read key file {}", path.display()))?;
            let keys = LocalKeys::from_toml_str(&text, &path.display().to_string())
                .context("Failed to load keys")?;
            let desc = relay.publish(keys).context("Failed to publish descriptor")?;
            info!("Publishing on port {}", desc.orport());
        }
        (Some(_), false) => {
            warn!("This node neither relays nor exits; ignoring the key file.");
        }
        (None, true) => {
            warn!("No key file given; not publishing a descriptor.");
        }
        (None, false) => {}
    }

    Ok(())
}
