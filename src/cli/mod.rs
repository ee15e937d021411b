pub mod jobs;
pub mod maintenance;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::models::{load_config, CacheConfig};
use crate::resolver::StaticResolver;
use crate::storage::LocalJobCache;

/// Job Cache - a filesystem-backed cache of dispatched jobs and worker results
#[derive(Parser, Debug)]
#[command(
    name = "jcache",
    version,
    about = "Job Cache - a filesystem-backed cache of dispatched jobs and worker results"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Cache root directory (overrides config)
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<String>,

    /// Known worker ids used to resolve targets (comma separated)
    #[arg(long, value_delimiter = ',', global = true)]
    pub workers: Vec<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reserve a new job id
    PrepJid {
        /// Claim this id instead of generating one
        #[arg(long)]
        jid: Option<String>,

        /// Do not cache worker results for this job
        #[arg(long)]
        nocache: bool,
    },

    /// Save the invocation record for a job
    SaveLoad {
        /// Job id
        jid: String,

        /// Invocation JSON file, or - for stdin
        file: String,
    },

    /// Record a worker report
    Return {
        /// Report JSON file, or - for stdin
        file: String,
    },

    /// Show the invocation record of a job
    GetLoad {
        /// Job id
        jid: String,
    },

    /// Show all worker results of a job
    GetJid {
        /// Job id
        jid: String,
    },

    /// List cached jobs
    List {
        /// Show at most N most recent jobs
        #[arg(long, default_value_t = 50)]
        count: usize,

        /// List every job, unfiltered and unbounded
        #[arg(long, conflicts_with_all = ["count", "include_polling"])]
        all: bool,

        /// Keep status-polling jobs in the listing
        #[arg(long)]
        include_polling: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove jobs older than the retention window
    Clean {
        /// Keep running, cleaning every N seconds
        #[arg(long)]
        every: Option<u64>,
    },

    /// Read or write a job's end time
    Endtime {
        #[command(subcommand)]
        action: EndtimeAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum EndtimeAction {
    /// Store the end time (defaults to now)
    Set {
        /// Job id
        jid: String,

        /// End time text
        time: Option<String>,
    },

    /// Print the stored end time
    Get {
        /// Job id
        jid: String,
    },
}

/// Resolve configuration from the global flags.
pub fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = load_config(cli.config.as_deref().map(Path::new))?;
    if let Some(dir) = &cli.cache_dir {
        config.cachedir = PathBuf::from(dir);
    }
    Ok(config)
}

async fn open_cache(cli: &Cli) -> Result<(CacheConfig, LocalJobCache)> {
    let config = resolve_config(cli)?;
    let resolver = Arc::new(StaticResolver::new(cli.workers.iter().cloned()));
    let cache = LocalJobCache::new(&config, resolver).await?;
    Ok((config, cache))
}

/// Read a JSON document from a file, or stdin for `-`.
pub async fn read_json_input(file: &str) -> Result<Value> {
    let content = if file == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file))?
    };
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON from {}", file))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> Result<()> {
    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (config, cache) = open_cache(cli).await?;
    match command {
        Commands::PrepJid { jid, nocache } => {
            jobs::cmd_prep_jid(&cache, jid.as_deref(), *nocache).await
        }
        Commands::SaveLoad { jid, file } => jobs::cmd_save_load(&cache, jid, file).await,
        Commands::Return { file } => jobs::cmd_return(&cache, file).await,
        Commands::GetLoad { jid } => jobs::cmd_get_load(&cache, jid).await,
        Commands::GetJid { jid } => jobs::cmd_get_jid(&cache, jid).await,
        Commands::List {
            count,
            all,
            include_polling,
            json,
        } => maintenance::cmd_list(&cache, *count, *all, !*include_polling, *json).await,
        Commands::Clean { every } => maintenance::cmd_clean(&cache, &config, *every).await,
        Commands::Endtime { action } => match action {
            EndtimeAction::Set { jid, time } => {
                jobs::cmd_endtime_set(&cache, jid, time.as_deref()).await
            }
            EndtimeAction::Get { jid } => jobs::cmd_endtime_get(&cache, jid).await,
        },
    }
}
