mod commands;
mod config;

use anyhow::Context;
use ascend_core::{AscendError, House};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ascend")]
#[command(about = "Ascend - pay-to-play NetHack pot operator")]
#[command(version)]
struct Cli {
    /// Data directory for the database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (ASCEND_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Session lifecycle commands
    #[command(subcommand)]
    Session(commands::SessionCommands),

    /// Pot balance commands
    #[command(subcommand)]
    Pot(commands::PotCommands),

    /// Finished games and payouts
    #[command(subcommand)]
    Games(commands::GamesCommands),

    /// Watch the xlogfile and settle games until interrupted
    Monitor,

    /// Append a finished game to the xlogfile
    Simulate(commands::SimulateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "ascend={},ascend_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let house_config = config::resolve(cli.data_dir, cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let house = House::open(house_config)
        .await
        .context("Failed to open the house database")?;

    // Execute command
    let result = match cli.command {
        Commands::Session(cmd) => commands::handle_session_command(cmd, &house).await,
        Commands::Pot(cmd) => commands::handle_pot_command(cmd, &house).await,
        Commands::Games(cmd) => commands::handle_games_command(cmd, &house).await,
        Commands::Monitor => commands::handle_monitor_command(&house).await,
        Commands::Simulate(args) => commands::handle_simulate_command(args, &house).await,
    };

    if let Err(e) = result {
        match e {
            AscendError::SessionNotFound { id } => {
                eprintln!("Error: Session '{}' not found", id);
                eprintln!("Use 'ascend session list' to see recent sessions");
            }
            AscendError::AccountInUse { account } => {
                eprintln!("Error: Account {} is already bound to a live session", account);
            }
            AscendError::ServerFull { active, max } => {
                eprintln!("Error: Server is full ({} of {} sessions live)", active, max);
            }
            AscendError::InvalidDestination(reason) => {
                eprintln!("Error: Invalid payout destination: {}", reason);
            }
            _ => {
                eprintln!("Error: {}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
