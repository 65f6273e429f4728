use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ofp_firewall::config::{self, ControllerConfig};
use ofp_firewall::firewall::BlockPair;
use ofp_firewall::firewall_switch::FirewallSwitch;
use ofp_firewall::logging::init_logging;
use ofp_firewall::ofp_controller::openflow0x04::Dispatcher;
use ofp_firewall::{Error, Result};

/// OpenFlow 1.3 learning switch controller with an IPv4 pair firewall.
#[derive(Debug, Parser)]
#[command(name = "ofp_firewall_controller", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address switches connect to
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Block traffic from SRC to DST, given as `SRC,DST`. Repeatable.
    #[arg(short, long = "block", value_name = "SRC,DST")]
    block: Vec<BlockPair>,

    /// Log level (error, warn, info, debug, trace) or filter directives
    #[arg(long)]
    log_level: Option<String>,
}

fn build_config(cli: Cli) -> Result<ControllerConfig> {
    let mut config = match cli.config {
        Some(path) => config::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.firewall.block.extend(cli.block);
    config.validate()?;
    Ok(config)
}

fn run(config: ControllerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen).map_err(|source| Error::Bind {
        addr: config.listen,
        source,
    })?;
    info!(
        listen = %config.listen,
        blocked = config.firewall.block.len(),
        non_ipv4 = ?config.firewall.non_ipv4,
        "controller listening"
    );
    for pair in &config.firewall.block {
        info!(%pair, "blocking");
    }
    let app = Arc::new(FirewallSwitch::from_config(&config));
    Arc::new(Dispatcher::new(app)).serve(listener)
}

fn main() {
    let cli = Cli::parse();
    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ofp_firewall_controller: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("ofp_firewall_controller: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(config) {
        error!(error = %e, "controller stopped");
        process::exit(1);
    }
}
