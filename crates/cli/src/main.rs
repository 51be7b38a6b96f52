mod candidates;
mod echo;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gleaner_core::{
    DocumentStore, FsDocumentStore, GleanerConfig, MemoryStore, ReqwestTransport, RunOptions, Store, canonicalize,
    domain_of, identify, method_health,
};
use gleaner_store::PgStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fetch candidate articles, extract their text and learn which method works per domain
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version, about = "Adaptive article extraction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Settings shared by the commands that open the store
#[derive(clap::Args, Debug)]
struct StoreArgs {
    /// Config file (default: $GLEANER_CONFIG, then ./gleaner.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// PostgreSQL URL; overrides storage.database_url
    #[arg(long, env = "DATABASE_URL", value_name = "URL")]
    database_url: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Candidate file, or "-" for stdin
    #[arg(long, value_name = "FILE")]
    candidates: String,

    /// Re-fetch and re-extract candidates that already have a winner
    #[arg(long)]
    force_refresh: bool,

    /// Stop after this many candidates
    #[arg(long, value_name = "NUM")]
    max_candidates: Option<usize>,

    /// Directory for cached documents and attempt outputs
    #[arg(long, value_name = "DIR")]
    documents_dir: Option<PathBuf>,

    /// Bypass the fetch cache
    #[arg(long)]
    no_cache: bool,

    /// Candidates processed at once
    #[arg(long, value_name = "NUM")]
    concurrency: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline_secs: Option<u64>,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a batch of candidates read as JSON lines
    Run(RunArgs),

    /// Show the weakest domain/method pairs
    Health {
        /// Rows to show
        #[arg(long, default_value = "20", value_name = "NUM")]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print the canonical URL, candidate id and domain of a URL
    Identify {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Generate a shell completion script
    Completions {
        #[arg(value_name = "SHELL")]
        shell: Shell,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info,gleaner=debug,gleaner_core=debug,gleaner_store=debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn load_config(args: &StoreArgs) -> anyhow::Result<GleanerConfig> {
    let mut config = GleanerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = args.database_url.as_ref().filter(|url| !url.trim().is_empty()) {
        config.storage.database_url = Some(url.clone());
    }
    Ok(config)
}

async fn open_store(config: &GleanerConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.storage.database_url {
        Some(url) => {
            let store: Arc<dyn Store> =
                Arc::new(PgStore::connect(url).await.context("Failed to connect to the database")?);
            Ok(store)
        }
        None => {
            warn!("No database configured; statistics and preferences last only for this process");
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            Ok(store)
        }
    }
}

/// Cancels `token` on Ctrl-C or when `deadline` elapses.
fn spawn_cancel_watch(token: CancellationToken, deadline: Option<Duration>) {
    tokio::spawn(async move {
        let deadline_elapsed = async {
            match deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = token.cancelled() => return,
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => warn!("Interrupted; finishing in-flight work"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                    return;
                }
            },
            _ = deadline_elapsed => warn!("Run deadline reached; cancelling"),
        }
        token.cancel();
    });
}

async fn run_command(args: RunArgs, verbose: bool) -> anyhow::Result<()> {
    if verbose {
        echo::print_step(1, 3, "Loading configuration");
    }
    let mut config = load_config(&args.store)?;
    if let Some(dir) = args.documents_dir {
        config.storage.documents_dir = dir;
    }
    if args.no_cache {
        config.fetch.cache_enabled = false;
    }
    if let Some(concurrency) = args.concurrency {
        config.run.concurrency = concurrency.max(1);
    }
    if let Some(secs) = args.deadline_secs {
        config.run.deadline = Some(Duration::from_secs(secs));
    }

    let path = args.candidates.as_str();
    let (candidates, skipped) = if path == "-" {
        candidates::read_candidates(io::stdin().lock()).context("Failed to read candidates from stdin")?
    } else {
        let file = File::open(path).with_context(|| format!("Failed to open candidate file: {path}"))?;
        candidates::read_candidates(BufReader::new(file))
            .with_context(|| format!("Failed to read candidate file: {path}"))?
    };
    if skipped > 0 {
        echo::print_warning(&format!("Skipped {skipped} unusable candidate lines"));
    }
    if verbose {
        echo::print_info(&format!("{} candidates", candidates.len()));
        echo::print_step(2, 3, "Opening stores");
    }

    let store = open_store(&config).await?;
    let documents: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(config.storage.documents_dir.clone()));
    let transport = Arc::new(ReqwestTransport::new(config.fetch.max_redirects).context("Failed to build HTTP client")?);
    let pipeline = config.build_pipeline(store, documents, transport);

    if verbose {
        echo::print_step(3, 3, &format!("Processing with {} workers", config.run.concurrency));
    }

    let cancel = CancellationToken::new();
    spawn_cancel_watch(cancel.clone(), config.run.deadline);

    let options = RunOptions { force_refresh: args.force_refresh, max_candidates: args.max_candidates };
    let result = pipeline.run(candidates, options, cancel.clone()).await;
    cancel.cancel();
    let report = result.context("Run aborted")?;

    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize run report")?);
    echo::print_run_summary(&report);
    echo::print_success(&format!("Run {} finished", report.run_id));
    Ok(())
}

async fn health_command(limit: usize, json: bool, store_args: &StoreArgs) -> anyhow::Result<()> {
    let config = load_config(store_args)?;
    let store = open_store(&config).await?;
    let items = method_health(store.as_ref(), limit, config.preferences.min_attempts)
        .await
        .context("Failed to read method statistics")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items).context("Failed to serialize method health")?);
    } else {
        print!("{}", echo::render_health(&items));
    }
    Ok(())
}

fn identify_command(url: &str) -> anyhow::Result<()> {
    let canonical = canonicalize(url).with_context(|| format!("Cannot canonicalize {url}"))?;
    let domain = domain_of(&canonical).with_context(|| format!("Cannot read domain of {canonical}"))?;
    let candidate_id = identify(&canonical);

    println!("canonical_url: {canonical}");
    println!("candidate_id:  {}", candidate_id.as_str());
    println!("domain:        {domain}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        echo::print_banner();
        echo::print_info("Debug logging enabled");
        eprintln!();
    }

    match cli.command {
        Command::Run(args) => run_command(args, cli.verbose).await,
        Command::Health { limit, json, store } => health_command(limit, json, &store).await,
        Command::Identify { url } => identify_command(&url),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "gleaner", &mut io::stdout());
            Ok(())
        }
    }
}
