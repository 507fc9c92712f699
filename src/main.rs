// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SMCP command line: run a hub, run a Computer, or check a configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use smcp::computer::{Computer, ComputerSession, SessionOptions};
use smcp::config::{self, ComputerConfig};
use smcp::inputs::{ConfigRenderer, InputProvider, InputResolver, StaticProvider, TerminalProvider};
use smcp::mcp::{ConnectionOptions, DefaultTransportFactory, ServerConfig};
use smcp::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use smcp::VERSION;

/// SMCP - MCP servers for remote Agents
#[derive(Parser)]
#[command(name = "smcp")]
#[command(author, version, about = "Hosts MCP servers for remote Agents", long_about = None)]
struct Cli {
    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling hub
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "SMCP_LISTEN", default_value = "127.0.0.1:7300")]
        listen: String,
    },
    /// Run a Computer and join an office
    Computer {
        /// Hub address
        #[arg(short, long, env = "SMCP_SERVER", default_value = "127.0.0.1:7300")]
        server: String,

        /// Office to join
        #[arg(short, long, env = "SMCP_OFFICE")]
        office: String,

        /// Computer name, unique within the office
        #[arg(short, long, env = "SMCP_NAME")]
        name: String,

        /// Configuration file (default: smcp.json in the workspace, then ~/.smcp/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not reconnect MCP servers that fail or drop
        #[arg(long)]
        no_auto_reconnect: bool,

        /// Never prompt; inputs fall back to their defaults
        #[arg(long)]
        non_interactive: bool,
    },
    /// Render a configuration and report what would be applied
    CheckConfig {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_telemetry(&TelemetryConfig::from_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Serve { listen } => {
            info!(addr = %listen, "Starting hub");
            smcp::server::listen(listen.as_str())
                .await
                .with_context(|| format!("hub on {} stopped", listen))?;
        }
        Commands::Computer {
            server,
            office,
            name,
            config,
            no_auto_reconnect,
            non_interactive,
        } => {
            run_computer(
                &server,
                &office,
                &name,
                config,
                !no_auto_reconnect,
                non_interactive,
            )
            .await?;
        }
        Commands::CheckConfig { config } => check_config(config).await?,
        Commands::Version => println!("smcp {}", VERSION),
    }
    Ok(())
}

fn load(explicit: Option<PathBuf>) -> anyhow::Result<ComputerConfig> {
    let workspace_root = std::env::current_dir()?;
    let (config, path) = config::load_config(explicit.as_deref(), &workspace_root)?;
    match path {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => warn!("No configuration file found; starting with no servers"),
    }
    Ok(config)
}

async fn run_computer(
    server: &str,
    office: &str,
    name: &str,
    config_path: Option<PathBuf>,
    auto_reconnect: bool,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let config = load(config_path)?;

    let provider: Arc<dyn InputProvider> = if non_interactive {
        Arc::new(StaticProvider::new())
    } else {
        Arc::new(TerminalProvider::new())
    };
    let resolver = Arc::new(InputResolver::new(Vec::new(), provider));
    let options = ConnectionOptions {
        auto_reconnect,
        ..ConnectionOptions::default()
    };
    let computer = Computer::new(name, Arc::new(DefaultTransportFactory), resolver, options);

    let report = computer.boot(config).await;
    for (server_name, state) in &report.applied {
        println!("{} {} ({})", "✓".green(), server_name, state);
    }
    for (server_name, reason) in &report.failed {
        println!("{} {}: {}", "✗".red(), server_name, reason);
    }
    for warning in &report.warnings {
        println!("{} {}", "!".yellow(), warning);
    }

    let session = ComputerSession::connect(server, Arc::clone(&computer), SessionOptions::new(office))
        .await
        .with_context(|| format!("could not join office '{}' on {}", office, server))?;
    println!(
        "{}",
        format!("Computer '{}' joined office '{}'", name, office).bright_cyan()
    );

    tokio::select! {
        _ = session.closed() => warn!("Hub closed the session"),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; leaving office");
            if let Err(e) = session.leave_office().await {
                warn!(error = %e, "Leave failed");
            }
            session.close();
        }
    }
    computer.shutdown().await;

    if tracing::enabled!(tracing::Level::DEBUG) {
        eprintln!("{}", GLOBAL_METRICS.snapshot().format_report());
    }
    Ok(())
}

async fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load(config_path)?;
    let resolver = InputResolver::new(config.inputs.clone(), Arc::new(StaticProvider::new()));
    let renderer = ConfigRenderer::default();

    let mut failures = 0;
    for raw in &config.servers {
        let name = ComputerConfig::server_name(raw).unwrap_or("<unnamed>").to_string();
        let rendered = renderer.render(raw, &resolver).await;
        for warning in &rendered.warnings {
            println!("{} {}: {}", "!".yellow(), name, warning);
        }
        match serde_json::from_value::<ServerConfig>(rendered.value) {
            Ok(server) => {
                let status = if server.disabled { "disabled" } else { "enabled" };
                println!(
                    "{} {} [{}] {}",
                    "✓".green(),
                    server.name.bright_white(),
                    server.transport.kind(),
                    status
                );
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), name, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} server config(s) rejected", failures);
    }
    Ok(())
}
