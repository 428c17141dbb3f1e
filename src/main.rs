//! seglog CLI entry point

use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use seglog::{
    commands::{
        cmd_append, cmd_db_init, cmd_init, cmd_process, cmd_read, cmd_status, cmd_worker,
        print_append_result, print_db_init, print_init, print_process_stats, print_read_report,
        print_status, print_worker_report, resolve_config_path, AppendOptions, ProcessOptions,
        ReadCommandOptions, WorkerOverrides,
    },
    config::Config,
    embed::create_embedder,
    error::{Error, Result},
    frame::Role,
    processor::SegmentProcessor,
    progress::LogWriterFactory,
    queue::create_queue,
    reader::{FrameFilter, OutputFormat, ReadMode, ReadOptions},
    store::{self, WorkStore},
    writer::SeqMode,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "seglog")]
#[command(version, about = "Append-only session logs and a batch embedding worker", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log records as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Work store URL (postgres://… or sqlite://…)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Append one event to a session log
    Append {
        /// Session id (sanitized before use in file names)
        session: String,

        /// Event content
        content: String,

        /// User id
        #[arg(long, default_value = "anonymous")]
        user: String,

        /// Speaker role: user, assistant or system
        #[arg(long, default_value = "user")]
        role: Role,

        /// Explicit sequence number
        #[arg(long, conflicts_with = "auto_seq")]
        seq: Option<i64>,

        /// Continue the session's sequence from the last logged frame
        #[arg(long)]
        auto_seq: bool,

        /// Metadata as key=value (repeatable)
        #[arg(long = "meta")]
        meta: Vec<String>,

        /// Seal the segment once it reaches this many bytes
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Seal the segment once it is this old
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// fsync after the write
        #[arg(long)]
        fsync: bool,

        /// Fail the append when the sealed segment cannot be queued
        #[arg(long)]
        strict_handoff: bool,
    },

    /// Stream frames from segment files
    Read {
        /// Segment files, read in the given order
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Only frames from this session
        #[arg(long)]
        session: Option<String>,

        /// Only frames from this user
        #[arg(long)]
        user: Option<String>,

        /// Only frames with this role
        #[arg(long)]
        role: Option<Role>,

        /// Only frames at or after this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only frames before this RFC 3339 time
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Stop quietly at a corrupt or truncated frame
        #[arg(long)]
        lenient: bool,

        /// Output format: binary or jsonl
        #[arg(long, default_value_t = OutputFormat::Jsonl)]
        format: OutputFormat,

        /// Print per-session frame counts to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Insert sealed segments into the work table
    Process {
        /// Sealed segment files
        paths: Vec<PathBuf>,

        /// Drain the segment queue as well
        #[arg(long)]
        from_queue: bool,

        /// Embed frames before inserting
        #[arg(long)]
        embed: bool,

        /// Decode and count without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the batch claim worker
    Worker {
        /// Rows claimed per iteration
        #[arg(long)]
        batch_size: Option<usize>,

        /// Sleep between idle polls, in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Embedding service URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Stop after this many iterations
        #[arg(long)]
        max_iterations: Option<u64>,

        /// File touched on every idle poll
        #[arg(long)]
        health_file: Option<PathBuf>,
    },

    /// Show segment and work store status
    Status,

    /// Manage the work store
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Database management actions
#[derive(Subcommand)]
enum DbAction {
    /// Create the work table and queue table
    Init,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("[error] {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let (json_layer, text_layer) = if cli.log_json {
        (
            Some(fmt::layer().json().with_writer(LogWriterFactory::default())),
            None,
        )
    } else {
        (
            None,
            Some(fmt::layer().with_writer(LogWriterFactory::default())),
        )
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init { force } = cli.command {
        let path = resolve_config_path(cli.config.as_deref());
        let config = cmd_init(&path, force)?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            print_init(&config);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "seglog", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(url) = cli.database_url.clone() {
        config.database.url = Some(url);
    }

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Append {
            session,
            content,
            user,
            role,
            seq,
            auto_seq,
            meta,
            max_bytes,
            max_age_secs,
            fsync,
            strict_handoff,
        } => {
            if let Some(max_bytes) = max_bytes {
                config.log.max_bytes = max_bytes;
            }
            if max_age_secs.is_some() {
                config.log.max_age_secs = max_age_secs;
            }
            config.log.fsync |= fsync;
            config.log.strict_handoff |= strict_handoff;

            let store = open_store(&config, config.queue.backend == "database").await?;
            let queue = create_queue(&config.queue, store)?;
            let seq = match (seq, auto_seq) {
                (Some(n), _) => SeqMode::Explicit(n),
                (None, true) => SeqMode::Auto,
                (None, false) => SeqMode::None,
            };
            let options = AppendOptions {
                session_id: session,
                user_id: user,
                role,
                content,
                seq,
                meta,
                durable: fsync,
            };

            let result = cmd_append(&config.log, queue, options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_append_result(&result);
            }
        }

        Commands::Read {
            paths,
            session,
            user,
            role,
            since,
            until,
            lenient,
            format,
            stats,
        } => {
            let options = ReadCommandOptions {
                paths,
                read: ReadOptions {
                    mode: if lenient {
                        ReadMode::Lenient
                    } else {
                        ReadMode::Strict
                    },
                    filter: FrameFilter {
                        session_id: session,
                        user_id: user,
                        role,
                        since,
                        until,
                    },
                },
                format,
            };

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let report = cmd_read(&options, &mut out)?;
            out.flush()?;

            if cli.json {
                eprintln!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_read_report(&report, stats);
            }
            if !report.errors.is_empty() {
                return Err(Error::Other(format!(
                    "{} of {} file(s) could not be fully read",
                    report.errors.len(),
                    options.paths.len()
                )));
            }
        }

        Commands::Process {
            paths,
            from_queue,
            embed,
            dry_run,
        } => {
            let store = open_store(&config, !dry_run).await?;
            let embedder = if embed {
                Some(create_embedder(&config.embedding)?)
            } else {
                None
            };
            let queue = create_queue(&config.queue, store.clone())?;
            let processor = SegmentProcessor::new(store, embedder, config.worker.hash_content);
            let options = ProcessOptions {
                paths,
                from_queue,
                embed,
                dry_run,
            };

            let stats = cmd_process(&processor, queue.as_ref(), &options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_process_stats(&stats, dry_run);
            }
            if !stats.failures.is_empty() {
                return Err(Error::Other(format!(
                    "{} segment(s) failed",
                    stats.failures.len()
                )));
            }
        }

        Commands::Worker {
            batch_size,
            poll_interval_ms,
            endpoint,
            max_iterations,
            health_file,
        } => {
            let overrides = WorkerOverrides {
                batch_size,
                poll_interval_ms,
                endpoint,
                max_iterations,
                health_file,
            };
            let config = overrides.apply(&config)?;
            let store = require_store(&config).await?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping worker");
                    on_signal.cancel();
                }
            });

            let report = cmd_worker(&config, store, cancel).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_worker_report(&report);
            }
        }

        Commands::Status => {
            let store = match open_store(&config, false).await {
                Ok(store) => store,
                Err(e) => {
                    warn!(error = %e, "Work store unavailable");
                    None
                }
            };
            let status = cmd_status(&config, store.as_deref()).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Db { action } => {
            handle_db_action(&config, action, cli.json).await?;
        }
    }

    Ok(())
}

async fn handle_db_action(config: &Config, action: DbAction, json: bool) -> Result<()> {
    let store = require_store(config).await?;

    match action {
        DbAction::Init => {
            let info = cmd_db_init(store.as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_db_init(&info);
            }
        }
    }

    Ok(())
}

/// Connect when a URL is configured; without one, `required` decides
/// between a configuration error and no store
async fn open_store(config: &Config, required: bool) -> Result<Option<Arc<dyn WorkStore>>> {
    if config.database.url.is_none() && !required {
        return Ok(None);
    }
    store::connect(&config.database).await.map(Some)
}

async fn require_store(config: &Config) -> Result<Arc<dyn WorkStore>> {
    store::connect(&config.database).await
}
