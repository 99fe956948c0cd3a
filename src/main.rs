//! # Session Scribe CLI (`scribe`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scribe init` | Create the SQLite database and run schema migrations |
//! | `scribe serve` | Start the HTTP API server |
//! | `scribe reindex <session-id>` | Rebuild a session's chunk index |
//!
//! ## Usage
//!
//! ```bash
//! scribe --config ./config/scribe.toml <command>
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use session_scribe::{config, db, migrate, pipeline, server};

/// Session Scribe — a session capture and study backend with grounded chat.
#[derive(Parser)]
#[command(
    name = "scribe",
    about = "Session Scribe — session capture, summarization, and grounded chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scribe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// session API endpoints.
    Serve,

    /// Rebuild the chunk index for one session from its stored transcript.
    Reindex {
        /// Session UUID.
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let pool = db::connect(&cfg).await?;
    migrate::run_migrations(&pool).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg, pool).await?;
        }
        Commands::Reindex { session_id } => {
            let session = pipeline::fetch_session(&pool, &session_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("session {} not found", session_id))?;
            let count = pipeline::index_session_transcript(&pool, &cfg, &session.id).await?;
            println!("Reindexed session {}: {} chunks.", session.id, count);
        }
    }

    Ok(())
}
