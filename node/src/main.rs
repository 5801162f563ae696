//! RAS Node Binary

use clap::{Parser, Subcommand};
use ras_core::RasConfig;
use ras_node::{NodeBuilder, SeedConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "ras-node")]
#[command(about = "RAS Node - anonymous panel review with quorum voting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed file with accords and reviewers
        #[arg(short, long)]
        seed: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Persist sessions and votes with sled
        #[arg(long)]
        sled: bool,
    },

    /// Print or save a sample seed file
    SeedTemplate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print or save the default configuration
    ConfigTemplate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn write_or_print(json: &str, output: Option<PathBuf>, what: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("{} saved to: {}", what, path.display());
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            seed,
            api_addr,
            data_dir,
            sled,
        } => {
            let config = match config {
                Some(path) => RasConfig::from_json(&std::fs::read_to_string(&path)?)?,
                None => RasConfig::default(),
            };
            init_logging(&config.log_level);
            info!("Starting RAS Node...");

            let seed_config = match seed {
                Some(path) => {
                    let seed = SeedConfig::from_json(&std::fs::read_to_string(&path)?)?;
                    info!("Loaded seed from {}", path.display());
                    seed
                }
                None => SeedConfig::sample(),
            };

            let mut builder = NodeBuilder::new().config(config).seed(seed_config);
            if let Some(addr) = api_addr {
                builder = builder.api_addr(&addr);
            }
            if let Some(dir) = data_dir {
                builder = builder.data_dir(dir);
            }
            if sled {
                builder = builder.sled();
            }

            let node = builder.build()?;
            node.start().await?;
        }

        Commands::SeedTemplate { output } => {
            let json = SeedConfig::sample().to_json()?;
            write_or_print(&json, output, "Seed template")?;
        }

        Commands::ConfigTemplate { output } => {
            let json = RasConfig::default().to_json()?;
            write_or_print(&json, output, "Config template")?;
        }
    }

    Ok(())
}
