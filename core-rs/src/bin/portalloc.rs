//! portalloc - Dynamic port allocator CLI
//!
//! Command-line front end for the allocation engine

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use port_alloc::{AllocationEngine, AllocatorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portalloc")]
#[command(version)]
#[command(about = "Dynamic TCP port allocator", long_about = None)]
struct Cli {
    /// Allocator config file (YAML). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find and claim free ports, print them as JSON
    Allocate {
        /// Number of ports (all or nothing)
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
        /// Service label recorded on the claim
        #[arg(long, short = 's')]
        service: Option<String>,
    },
    /// Report whether each port can be bound right now
    Health {
        /// Ports to check
        #[arg(required = true)]
        ports: Vec<u16>,
    },
    /// Print the effective configuration as YAML
    Config,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AllocatorConfig> {
    match path {
        Some(path) => AllocatorConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(AllocatorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Allocate { count, service } => {
            let engine = AllocationEngine::new(config)?;

            let ports = if count == 1 {
                vec![engine.allocate_optimal_port(service.as_deref()).await?]
            } else {
                engine
                    .allocate_multiple_ports(count, service.as_deref(), None)
                    .await?
            };

            let infos: Vec<_> = ports
                .iter()
                .filter_map(|&port| engine.get_port_info(port))
                .collect();
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }

        Commands::Health { ports } => {
            let engine = AllocationEngine::new(config)?;
            let results = engine.health_check_ports(&ports).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Commands::Config => {
            config.validate()?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
