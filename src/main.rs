use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use arv::config::ArvConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "arv")]
#[command(version, about = "Associative remote viewing session orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Database path. Overrides [store] path in arv.toml.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Image directory. Overrides [images] dir in arv.toml.
    #[arg(long, global = true)]
    pub images_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new arv project
    Init,
    /// Serve the HTTP API and run the reconciliation sweeper
    Serve {
        /// Port to serve on. Overrides [server] port in arv.toml.
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not start the background sweeper
        #[arg(long)]
        no_sweeper: bool,

        /// Enable permissive CORS for a local front-end dev server
        #[arg(long)]
        dev: bool,
    },
    /// Create a new session with two random images
    Create,
    /// Submit an impression for a new session
    Activate {
        id: String,
        impression: String,

        /// Return once the impression is stored; leave judging to the sweeper
        #[arg(long)]
        no_wait: bool,
    },
    /// Show one session
    Show { id: String },
    /// List sessions
    List {
        /// Only sessions in this status (new, unjudged, judged, investing, invested, resolved, shown)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Run the transition the session's current status calls for
    Advance { id: String },
    /// Mark a resolved session's outcome as shown
    Feedback { id: String },
    /// Run a single reconciliation cycle
    Sweep,
    /// Show win/loss statistics over resolved sessions
    Stats,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default arv.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let mut config = ArvConfig::with_cli_args(project_dir.clone(), cli.verbose, cli.db_path.clone())?;
    config.cli_images_dir = cli.images_dir.clone();
    arv::logging::init_tracing(config.log_level(), config.toml.logging.json)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Serve {
            port,
            no_sweeper,
            dev,
        } => {
            config.cli_port = *port;
            cmd::cmd_serve(&config, *no_sweeper, *dev).await?;
        }
        Commands::Create => cmd::cmd_create(&config).await?,
        Commands::Activate {
            id,
            impression,
            no_wait,
        } => cmd::cmd_activate(&config, id, impression, *no_wait).await?,
        Commands::Show { id } => cmd::cmd_show(&config, id).await?,
        Commands::List { status } => cmd::cmd_list(&config, status.as_deref()).await?,
        Commands::Advance { id } => cmd::cmd_advance(&config, id).await?,
        Commands::Feedback { id } => cmd::cmd_feedback(&config, id).await?,
        Commands::Sweep => cmd::cmd_sweep(&config).await?,
        Commands::Stats => cmd::cmd_stats(&config).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
