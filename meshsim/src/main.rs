use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshsim::{Orchestrator, Scenario};

#[derive(Parser)]
#[command(name = "meshsim")]
#[command(about = "Multi-cluster container-network fabric emulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Bring a scenario up, program its routing, then tear it down
    Run {
        /// Scenario file (TOML)
        #[arg(long)]
        scenario: PathBuf,

        /// Leave the fabric running on exit
        #[arg(long)]
        keep: bool,
    },
    /// Validate a scenario and print the derived topology
    Check {
        /// Scenario file (TOML)
        #[arg(long)]
        scenario: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { scenario, keep } => {
            let scenario = Scenario::load(&scenario)?;
            let mut orchestrator = Orchestrator::new(scenario);
            let outcome = orchestrator.up().await;
            if !keep {
                orchestrator.down().await;
            }
            outcome
        }
        Commands::Check { scenario } => {
            let scenario = Scenario::load(&scenario)?;
            print!("{}", Orchestrator::new(scenario).plan());
            Ok(())
        }
    }
}
