//! Orchestra CLI - ask analytical questions against a local warehouse
//!
//! Usage:
//!   orchestra init [path]                   - Write the default configuration
//!   orchestra ask "<query>" [--thread ID]   - Run one analysis thread
//!   orchestra resume <thread>               - Continue a persisted thread
//!   orchestra threads                       - List persisted threads
//!   orchestra show <thread>                 - Print a thread's logs and report

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orchestra_agent::{Oracle, OracleClient, TimeoutOracle};
use orchestra_core::{OrchestraConfig, Phase, TaskState, ThreadId};
use orchestra_orchestrator::{Orchestrator, Outcome, ProgressEvent, StopReason};
use orchestra_sandbox::SandboxExecutor;
use orchestra_storage::{CheckpointStore, MemoryCheckpointStore, TursoCheckpointStore, TursoWarehouse};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "orchestra")]
#[command(author, version, about = "Planner-driven analytics assistant", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root holding `.orchestra/`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run one analysis thread and print the final report
    Ask {
        /// Natural-language question
        query: String,

        /// Thread id (a new one is generated when omitted)
        #[arg(long)]
        thread: Option<String>,

        /// Override the planner iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Keep checkpoints in memory only
        #[arg(long)]
        memory_store: bool,
    },

    /// Continue a persisted thread from its checkpoint
    Resume {
        thread: String,

        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// List persisted threads
    Threads {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a thread's message log, analysis and report
    Show { thread: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Ask {
            query,
            thread,
            max_iterations,
            memory_store,
        } => cmd_ask(&cli.root, query, thread, max_iterations, memory_store).await,
        Commands::Resume {
            thread,
            max_iterations,
        } => cmd_resume(&cli.root, thread, max_iterations).await,
        Commands::Threads { json } => cmd_threads(&cli.root, json).await,
        Commands::Show { thread } => cmd_show(&cli.root, thread).await,
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = OrchestraConfig::write_default(path)
        .with_context(|| format!("Failed to initialize {:?}", path))?;
    println!("Initialized Orchestra in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set storage.warehouse_path (or DATABASE_URL) to your SQLite warehouse");
    println!("  2. Export the API key named by oracle.api_key_env");
    println!("  3. orchestra ask \"What was total revenue last month?\"");
    Ok(())
}

async fn cmd_ask(
    root: &Path,
    query: String,
    thread: Option<String>,
    max_iterations: Option<usize>,
    memory_store: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Query must not be empty");
    }
    let config = load_config(root)?;
    let store: Arc<dyn CheckpointStore> = if memory_store {
        Arc::new(MemoryCheckpointStore::new())
    } else {
        Arc::new(open_store(root, &config).await?)
    };
    let thread_id = thread.map(ThreadId::from).unwrap_or_default();

    let (orchestrator, progress) = build_orchestrator(root, &config, store, max_iterations).await?;
    let cancel = cancel_on_ctrl_c();
    println!("Thread: {}", thread_id);

    let printer = tokio::spawn(print_progress(progress));
    let outcome = orchestrator
        .run(thread_id, &query, &cancel)
        .await
        .context("Analysis thread failed")?;
    drop(orchestrator);
    let _ = printer.await;

    report_outcome(&outcome, memory_store);
    Ok(())
}

async fn cmd_resume(root: &Path, thread: String, max_iterations: Option<usize>) -> Result<()> {
    let config = load_config(root)?;
    let store = Arc::new(open_store(root, &config).await?);
    let thread_id = ThreadId::from(thread);

    let (orchestrator, progress) = build_orchestrator(root, &config, store, max_iterations).await?;
    let cancel = cancel_on_ctrl_c();

    let printer = tokio::spawn(print_progress(progress));
    let outcome = orchestrator
        .resume(&thread_id, &cancel)
        .await
        .with_context(|| format!("Failed to resume thread {}", thread_id))?;
    drop(orchestrator);
    let _ = printer.await;

    report_outcome(&outcome, false);
    Ok(())
}

async fn cmd_threads(root: &Path, json: bool) -> Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config).await?;
    let threads = store.list_threads().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
        return Ok(());
    }
    if threads.is_empty() {
        println!("No threads recorded yet.");
        return Ok(());
    }

    println!("{:<38} {:<18} {:>5}  {}", "THREAD", "PHASE", "STEP", "UPDATED");
    for summary in threads {
        println!(
            "{:<38} {:<18} {:>5}  {}",
            summary.thread_id,
            summary.phase.to_string(),
            summary.step,
            summary.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_show(root: &Path, thread: String) -> Result<()> {
    let config = load_config(root)?;
    let store = open_store(root, &config).await?;
    let thread_id = ThreadId::from(thread);
    let state = store
        .load(&thread_id)
        .await?
        .with_context(|| format!("No thread named {}", thread_id))?;

    print!("{}", render_thread(&state));
    Ok(())
}

fn load_config(root: &Path) -> Result<OrchestraConfig> {
    let mut config = OrchestraConfig::load_or_default(root)
        .with_context(|| format!("Failed to load configuration under {:?}", root))?;
    config.apply_env_overrides();
    debug!("Loaded configuration: {:?}", config);
    Ok(config)
}

async fn open_store(root: &Path, config: &OrchestraConfig) -> Result<TursoCheckpointStore> {
    let path = config.storage.checkpoint_path_in(root);
    TursoCheckpointStore::open(&path)
        .await
        .with_context(|| format!("Failed to open checkpoint store at {}", path.display()))
}

async fn build_orchestrator(
    root: &Path,
    config: &OrchestraConfig,
    store: Arc<dyn CheckpointStore>,
    max_iterations: Option<usize>,
) -> Result<(Orchestrator, mpsc::UnboundedReceiver<ProgressEvent>)> {
    let warehouse_path = warehouse_path(root, config)?;
    let warehouse = TursoWarehouse::open(&warehouse_path)
        .await
        .with_context(|| format!("Failed to open warehouse at {}", warehouse_path.display()))?;

    let client = OracleClient::from_config(&config.oracle).context("Failed to configure the oracle")?;
    info!("Using {} at {}", client.model(), client.endpoint());
    let oracle: Arc<dyn Oracle> = Arc::new(TimeoutOracle::new(client, config.oracle.timeout()));

    let executor = SandboxExecutor::from_config(&config.sandbox);
    let (tx, rx) = mpsc::unbounded_channel();

    let mut orchestrator =
        Orchestrator::new(oracle, Arc::new(warehouse), executor, store, &config.engine).with_progress(tx);
    if let Some(cap) = max_iterations {
        orchestrator = orchestrator.with_max_iterations(cap);
    }
    Ok((orchestrator, rx))
}

fn warehouse_path(root: &Path, config: &OrchestraConfig) -> Result<PathBuf> {
    let Some(path) = config.storage.warehouse_path.as_ref() else {
        bail!("No warehouse configured; set storage.warehouse_path in .orchestra/config.toml or DATABASE_URL");
    };
    let path = if path.is_absolute() {
        path.clone()
    } else {
        root.join(path)
    };
    if !path.exists() {
        bail!("Warehouse {} does not exist", path.display());
    }
    Ok(path)
}

/// Cancel the token on the first Ctrl-C; the loop stops between cycles
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let interrupted = || async { tokio::signal::ctrl_c().await.is_ok() };
        if watch_interrupts(interrupted, token).await {
            std::process::exit(130);
        }
    });
    cancel
}

/// First interrupt cancels the run, a second one asks for an immediate exit
///
/// `next_interrupt` resolves to `false` when no more signals can arrive.
/// Returns `true` when the caller should exit right away.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    if !next_interrupt().await {
        return false;
    }
    warn!("Interrupt received, stopping after the current step (Ctrl-C again to quit)");
    cancel.cancel();

    if !next_interrupt().await {
        return false;
    }
    warn!("Second interrupt, exiting without waiting for the current step");
    true
}

async fn print_progress(mut progress: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = progress.recv().await {
        println!("{}", progress_line(&event));
    }
}

fn progress_line(event: &ProgressEvent) -> String {
    format!("[step {}] {}: {}", event.step, event.phase, event.detail)
}

fn report_outcome(outcome: &Outcome, ephemeral: bool) {
    println!();
    match outcome.stop_reason {
        StopReason::Cancelled => {
            println!("Cancelled at {}.", outcome.state.phase);
            if ephemeral {
                println!("Checkpoints were kept in memory; this thread cannot be resumed.");
            } else {
                println!("Resume with: orchestra resume {}", outcome.thread_id);
            }
        }
        StopReason::Completed | StopReason::IterationCap => {
            if outcome.stop_reason == StopReason::IterationCap {
                println!(
                    "Stopped at the iteration cap after {} planner steps.",
                    outcome.planner_invocations
                );
            }
            match &outcome.final_report {
                Some(report) => println!("{}", report),
                None => println!("No report was produced."),
            }
        }
    }
}

fn render_thread(state: &TaskState) -> String {
    let mut out = String::new();
    out.push_str(&format!("Thread: {}\n", state.thread_id));
    out.push_str(&format!("Query:  {}\n", state.user_query));
    out.push_str(&format!(
        "Phase:  {} (step {}{})\n",
        state.phase,
        state.planner_invocations,
        if state.degraded { ", iteration cap" } else { "" }
    ));

    out.push_str("\n## Messages\n");
    for message in &state.message_log {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            message.timestamp.format("%H:%M:%S"),
            message.role,
            message.content
        ));
    }

    out.push_str("\n## Analysis\n");
    let analysis = state.analysis_text();
    if analysis.trim().is_empty() {
        out.push_str("(none)\n");
    } else {
        out.push_str(&analysis);
        out.push('\n');
    }

    out.push_str("\n## Report\n");
    match &state.final_report {
        Some(report) => {
            out.push_str(report);
            out.push('\n');
        }
        None if state.phase == Phase::Done => out.push_str("(none)\n"),
        None => out.push_str("(not produced yet)\n"),
    }
    out
}
