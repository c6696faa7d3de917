//! `trustintd` CLI/daemon: validate, ingest, export, search, intake, and the
//! inbox watcher for the TRUSTINT trust registry.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use notify::{EventKind, RecursiveMode, Watcher};
use trustint_core::intake::{IntakeEngine, IntakeOutcome};
use trustint_core::verify::VerifyError;
use trustint_core::{export, ingest, migrate, quarantine};
use trustint_core::{verify_chain, KeyLoader, Ledger, Store, VaultLayout};
use trustint_spec::policy::IntakePolicy;
use trustint_spec::validate_documents;

/// Trustintd command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "TRUSTINT_LOG_LEVEL")]
    log_level: Option<String>,
    /// Vault root holding the store, ledger, key, raw vault, and quarantine.
    #[arg(long, env = "TRUSTINT_VAULT", default_value = "vault", value_name = "DIR")]
    vault: PathBuf,
    /// Directory holding the declarative documents.
    #[arg(long, env = "TRUSTINT_CONFIG", default_value = "config", value_name = "DIR")]
    config: PathBuf,
    /// Directory holding migration scripts.
    #[arg(long, default_value = "migrations", value_name = "DIR")]
    migrations: PathBuf,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for trustintd.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the declarative documents.
    Validate,
    /// Migrate the store, validate, and ingest the declarative documents.
    Ingest {
        /// Skip validation before ingesting.
        #[arg(long)]
        no_validate: bool,
    },
    /// Export JSONL, CSV, and Markdown artifacts plus checksums.
    Export {
        /// Output directory.
        #[arg(long, default_value = "dist", value_name = "DIR")]
        dist: PathBuf,
    },
    /// Query the full-text index.
    Search {
        /// Restrict the search to one scope.
        #[arg(
            long,
            default_value = "all",
            value_parser = ["trusts", "roles", "assets", "obligations", "all"]
        )]
        scope: String,
        /// FTS query string.
        query: String,
    },
    /// Apply (or plan) pending schema migrations.
    Migrate {
        /// Stop at this version instead of the highest discovered.
        #[arg(long)]
        target: Option<i64>,
        /// Show pending migrations without applying them.
        #[arg(long)]
        plan: bool,
    },
    /// Replay-verify the provenance ledger.
    ///
    /// Exit codes: 0 pass, 1 broken chain (line on stderr), 2 errors before
    /// verification begins.
    Verify {
        /// Ledger file (defaults to the vault ledger).
        #[arg(long, value_name = "FILE")]
        ledger: Option<PathBuf>,
    },
    /// Generate a fresh HMAC key, replacing the key file.
    Keygen,
    /// Run the intake state machine over explicit files.
    Intake {
        /// Intake policy document.
        #[arg(long, default_value = "config/intake_policy.yaml", value_name = "FILE")]
        policy: PathBuf,
        /// Files to process.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Quarantine ticket operations.
    Quarantine {
        /// Ticket operation.
        #[command(subcommand)]
        command: QuarantineCommands,
    },
    /// Drain the inbox, then watch it for new submissions.
    Daemon {
        /// Inbox directory to watch.
        #[arg(long, value_name = "DIR")]
        inbox: PathBuf,
        /// Intake policy document.
        #[arg(long, default_value = "config/intake_policy.yaml", value_name = "FILE")]
        policy: PathBuf,
    },
}

/// Quarantine subcommands.
#[derive(Subcommand, Debug)]
enum QuarantineCommands {
    /// List open tickets, oldest first.
    List,
    /// Show one ticket joined with its inbox entry.
    Show {
        /// Ticket id (`T` + 8 hex).
        ticket_id: String,
    },
    /// Resolve an open ticket. Resolution is irrevocable.
    Resolve {
        /// Ticket id (`T` + 8 hex).
        ticket_id: String,
        /// Operator note recorded on the ticket.
        #[arg(long)]
        note: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let layout = VaultLayout::new(&cli.vault);

    match cli.command {
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Ingest { no_validate } => {
            cmd_ingest(&layout, &cli.config, &cli.migrations, no_validate)
        }
        Commands::Export { dist } => cmd_export(&layout, &dist),
        Commands::Search { scope, query } => cmd_search(&layout, &query, &scope),
        Commands::Migrate { target, plan } => cmd_migrate(&layout, &cli.migrations, target, plan),
        Commands::Verify { ledger } => std::process::exit(cmd_verify(&layout, ledger)),
        Commands::Keygen => cmd_keygen(&layout),
        Commands::Intake { policy, files } => cmd_intake(&layout, &policy, &files),
        Commands::Quarantine { command } => cmd_quarantine(&layout, command),
        Commands::Daemon { inbox, policy } => cmd_daemon(&layout, &inbox, &policy),
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn cmd_validate(config_dir: &Path) -> anyhow::Result<()> {
    let set = ingest::load_config(config_dir)?;
    let counts = validate_documents(&set)?;
    println!(
        "OK: {} trusts, {} roles, {} assets, {} obligations, {} jurisdictions",
        counts.trusts, counts.roles, counts.assets, counts.obligations, counts.jurisdictions
    );
    Ok(())
}

fn cmd_ingest(
    layout: &VaultLayout,
    config_dir: &Path,
    migrations_dir: &Path,
    no_validate: bool,
) -> anyhow::Result<()> {
    let ledger = Ledger::open(layout);
    let mut store = Store::open(&layout.db_path())?;
    migrate::run_migrations(&mut store, &ledger, migrations_dir, None)?;

    if no_validate {
        warn!("skipping validation before ingest");
    } else {
        let set = ingest::load_config(config_dir)?;
        validate_documents(&set)?;
    }

    let counters = ingest::ingest(&mut store, &ledger, config_dir)?;
    println!(
        "OK: ingested; totals: {} trusts, {} roles, {} assets, {} obligations, {} jurisdictions",
        counters.trusts,
        counters.roles,
        counters.assets,
        counters.obligations,
        counters.jurisdictions
    );
    Ok(())
}

fn cmd_export(layout: &VaultLayout, dist: &Path) -> anyhow::Result<()> {
    let ledger = Ledger::open(layout);
    let store = Store::open(&layout.db_path())?;
    let paths = export::export_all(&store, &ledger, dist)?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_search(layout: &VaultLayout, query: &str, scope: &str) -> anyhow::Result<()> {
    let store = Store::open(&layout.db_path())?;
    let scope = (scope != "all").then_some(scope);
    let hits = ingest::search(&store, query, scope)?;
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    let w_scope = hits.iter().map(|h| h.scope.len()).max().unwrap_or(5).max(5);
    let w_key = hits.iter().map(|h| h.key.len()).max().unwrap_or(3).max(3);
    println!("{:<w_scope$} {:<w_key$} CONTENT", "SCOPE", "KEY");
    for hit in hits {
        let mut content = hit.content.replace('\n', " ");
        if content.chars().count() > 70 {
            content = content.chars().take(67).collect();
            content.push_str("...");
        }
        println!("{:<w_scope$} {:<w_key$} {}", hit.scope, hit.key, content);
    }
    Ok(())
}

fn cmd_migrate(
    layout: &VaultLayout,
    migrations_dir: &Path,
    target: Option<i64>,
    plan: bool,
) -> anyhow::Result<()> {
    let mut store = Store::open(&layout.db_path())?;
    if plan {
        let current = migrate::current_version(&mut store)?;
        let pending: Vec<_> = migrate::discover(migrations_dir)?
            .into_iter()
            .filter(|m| m.version > current && target.map_or(true, |t| m.version <= t))
            .collect();
        if pending.is_empty() {
            println!("Schema at version {current}; nothing to apply.");
        } else {
            println!("Schema at version {current}; pending:");
            for migration in pending {
                println!("  {}", migration.name);
            }
        }
        return Ok(());
    }
    let ledger = Ledger::open(layout);
    let outcome = migrate::run_migrations(&mut store, &ledger, migrations_dir, target)?;
    if outcome.applied.is_empty() {
        println!("Schema already at version {}.", outcome.from_version);
    } else {
        println!(
            "Migrated {} -> {} ({} scripts).",
            outcome.from_version,
            outcome.to_version,
            outcome.applied.len()
        );
    }
    Ok(())
}

fn cmd_verify(layout: &VaultLayout, ledger_override: Option<PathBuf>) -> i32 {
    let path = ledger_override.unwrap_or_else(|| layout.ledger_path());
    if !path.exists() {
        eprintln!("ERR: ledger not found: {}", path.display());
        return 2;
    }
    let loaded = match KeyLoader::from_env(layout.key_path()).load() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("ERR: {err}");
            return 2;
        }
    };
    match verify_chain(&path, &loaded.bytes) {
        Ok(count) => {
            println!("PASS: verified {count} events; linkage & HMAC OK");
            println!("{}", loaded.status);
            0
        }
        Err(VerifyError::Integrity(fault)) => {
            eprintln!("FAIL line {}: {}", fault.line, fault.fault);
            1
        }
        Err(VerifyError::Io(err)) => {
            eprintln!("ERR: {err:#}");
            2
        }
    }
}

fn cmd_keygen(layout: &VaultLayout) -> anyhow::Result<()> {
    let loaded = KeyLoader::from_env(layout.key_path()).generate()?;
    println!("{}", loaded.status);
    Ok(())
}

fn load_policy(path: &Path) -> anyhow::Result<IntakePolicy> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read intake policy {}", path.display()))?;
    IntakePolicy::from_yaml(&text)
        .with_context(|| format!("failed to parse intake policy {}", path.display()))
}

fn cmd_intake(layout: &VaultLayout, policy_path: &Path, files: &[PathBuf]) -> anyhow::Result<()> {
    let policy = load_policy(policy_path)?;
    let ledger = Ledger::open(layout);
    let mut store = Store::open(&layout.db_path())?;
    let mut engine = IntakeEngine::new(&mut store, &ledger, policy, layout.clone());
    for file in files {
        let outcome = engine.process(file)?;
        report_outcome(file, &outcome);
    }
    Ok(())
}

fn report_outcome(path: &Path, outcome: &IntakeOutcome) {
    match outcome {
        IntakeOutcome::Accepted { sha256, stored_at } => {
            println!("ACCEPT {} -> {} ({sha256})", path.display(), stored_at.display());
        }
        IntakeOutcome::Duplicate { sha256 } => {
            println!("DUPLICATE {} ({sha256})", path.display());
        }
        IntakeOutcome::Rejected {
            ticket_id, reason, ..
        } => {
            println!("REJECT {} ticket {ticket_id}: {reason}", path.display());
        }
        IntakeOutcome::Skipped => {
            println!("SKIP {}", path.display());
        }
    }
}

fn cmd_quarantine(layout: &VaultLayout, command: QuarantineCommands) -> anyhow::Result<()> {
    let mut store = Store::open(&layout.db_path())?;
    match command {
        QuarantineCommands::List => {
            let tickets = quarantine::list_open(&store)?;
            if tickets.is_empty() {
                println!("No open tickets.");
                return Ok(());
            }
            for ticket in tickets {
                println!("{}  {}  {}", ticket.id, ticket.created_at, ticket.reason);
            }
        }
        QuarantineCommands::Show { ticket_id } => {
            let detail = quarantine::show(&store, &ticket_id)?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        QuarantineCommands::Resolve { ticket_id, note } => {
            let ledger = Ledger::open(layout);
            let ticket = quarantine::resolve(&mut store, &ledger, &ticket_id, &note)?;
            println!(
                "Resolved {} at {}.",
                ticket.id,
                ticket.resolved_at.as_deref().unwrap_or("?")
            );
        }
    }
    Ok(())
}

fn cmd_daemon(layout: &VaultLayout, inbox: &Path, policy_path: &Path) -> anyhow::Result<()> {
    let policy = load_policy(policy_path)?;
    let ledger = Ledger::open(layout);
    info!("{}", ledger.key_status()?);
    let mut store = Store::open(&layout.db_path())?;
    fs::create_dir_all(inbox)
        .with_context(|| format!("failed to create inbox {}", inbox.display()))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install interrupt handler")?;
    }

    let mut engine = IntakeEngine::new(&mut store, &ledger, policy, layout.clone());

    // Drain whatever is already waiting before subscribing to events.
    for (path, outcome) in engine.drain(inbox)? {
        report_outcome(&path, &outcome);
    }

    let (tx, rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            let _ = tx.send(res);
        })
        .context("failed to create inbox watcher")?;
    watcher
        .watch(inbox, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch inbox {}", inbox.display()))?;
    info!(inbox = %inbox.display(), "watching inbox for submissions");

    while !shutdown.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(event)) => {
                if !matches!(event.kind, EventKind::Create(_)) {
                    continue;
                }
                for path in event.paths {
                    let outcome = engine.process(&path)?;
                    report_outcome(&path, &outcome);
                }
            }
            Ok(Err(err)) => warn!(error = %err, "watcher error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("shutdown requested; stopping watcher");
    drop(watcher);
    Ok(())
}
