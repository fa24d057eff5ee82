// Extendipede - Main Entry Point
//
// CLI for the command gate:
// - serve the HTTP API (default)
// - check a command against the policy without running it
// - run a command locally through the gate
// - list the allowed commands

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extendipede::config::Config;
use extendipede::gate::CommandGate;
use extendipede::{logging, metrics, metrics_server, server};
use std::path::PathBuf;
use tracing::{error, info};

/// Extendipede: allowlisted remote command execution
#[derive(Parser, Debug)]
#[command(name = "extendipede")]
#[command(author = "Extendipede Contributors")]
#[command(version)]
#[command(about = "Allowlisted command execution over HTTP", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check a command against the policy without running it
    Check {
        /// Command line to check
        command: String,
    },
    /// Validate and run a command locally
    Run {
        /// Command line to run
        command: String,
    },
    /// List the allowed commands
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    logging::init(&config.logging, args.verbose)?;

    match args.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Check { command } => {
            if !check(&config, &command) {
                std::process::exit(1);
            }
        }
        Commands::Run { command } => {
            if !run(&config, &command).await {
                std::process::exit(1);
            }
        }
        Commands::List => list(&config),
    }

    Ok(())
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    info!(
        "Extendipede v{} starting ({:?} profile)",
        env!("CARGO_PKG_VERSION"),
        config.profile
    );

    metrics::init().context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        let host = config.server.host.clone();
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics_server::start_metrics_server(&host, port).await {
                error!("Metrics server failed: {:#}", e);
            }
        });
    }

    server::serve(&config).await
}

/// Print the policy decision; returns whether the command is allowed
fn check(config: &Config, command: &str) -> bool {
    let gate = CommandGate::from_config(&config.gate);
    let decision = gate.validate(command);

    if decision.allow {
        println!("allowed: {}", decision.tokens.join(" "));
    } else {
        match &decision.denial {
            Some(denial) => println!("denied ({}): {}", decision.reason, denial),
            None => println!("denied ({})", decision.reason),
        }
    }
    decision.allow
}

/// Run through the gate and print the result; returns success
async fn run(config: &Config, command: &str) -> bool {
    let gate = CommandGate::from_config(&config.gate);
    let result = gate.run(command).await;

    println!("{}", result.output);
    if !result.success {
        eprintln!("error: {}", result.summary());
    }
    result.success
}

fn list(config: &Config) {
    let gate = CommandGate::from_config(&config.gate);
    let allowed = gate.allowed_commands();
    for name in allowed.names() {
        println!("{}", name);
    }
    println!("{} commands allowed", allowed.len());
}
