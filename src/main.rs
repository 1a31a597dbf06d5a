use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use draftsync::config::{Overrides, Settings};

mod cmd;

#[derive(Parser)]
#[command(name = "draftsync")]
#[command(version, about = "Realtime watcher for AI article-generation pipelines")]
pub struct Cli {
    /// Backend API base URL (env: DRAFTSYNC_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Realtime WebSocket URL (env: DRAFTSYNC_REALTIME_URL)
    #[arg(long, global = true)]
    pub realtime_url: Option<String>,

    /// Bearer token (env: DRAFTSYNC_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Authenticated user id (env: DRAFTSYNC_USER_ID)
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a generation process and render live progress
    Watch {
        process_id: String,

        /// Answer input requests through terminal prompts
        #[arg(short, long)]
        interactive: bool,
    },
    /// Start a new generation and watch it
    Start {
        /// Target keyword for the article
        keyword: String,

        /// Article type hint passed to the pipeline
        #[arg(long)]
        article_type: Option<String>,

        /// Target length in words
        #[arg(long)]
        target_length: Option<u32>,

        /// Answer input requests through terminal prompts
        #[arg(short, long)]
        interactive: bool,
    },
    /// Fetch a process once and print the reconciled snapshot
    State { process_id: String },
    /// Pause a running generation
    Pause { process_id: String },
    /// Resume a paused generation
    Resume { process_id: String },
    /// Cancel a generation
    Cancel { process_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "draftsync=debug"
    } else {
        "draftsync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(Overrides {
        api_url: cli.api_url.clone(),
        realtime_url: cli.realtime_url.clone(),
        token: cli.token.clone(),
        user_id: cli.user_id.clone(),
        verbose: cli.verbose,
    })?;

    match &cli.command {
        Commands::Watch {
            process_id,
            interactive,
        } => cmd::cmd_watch(&settings, process_id, *interactive).await?,
        Commands::Start {
            keyword,
            article_type,
            target_length,
            interactive,
        } => {
            cmd::cmd_start(
                &settings,
                keyword,
                article_type.clone(),
                *target_length,
                *interactive,
            )
            .await?
        }
        Commands::State { process_id } => cmd::cmd_state(&settings, process_id).await?,
        Commands::Pause { process_id } => cmd::cmd_pause(&settings, process_id).await?,
        Commands::Resume { process_id } => cmd::cmd_resume(&settings, process_id).await?,
        Commands::Cancel { process_id } => cmd::cmd_cancel(&settings, process_id).await?,
    }

    Ok(())
}
