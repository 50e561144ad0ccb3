//! LedgerSeal command-line tool.
//!
//! Thin consumer of the ledger crates: it opens the configured store, runs
//! one operation and prints the result.  It has no ledger logic of its own.
//!
//! Usage:
//!   ledgerseal --data-dir ./ledger seed-demo --tenant T1
//!   ledgerseal --data-dir ./ledger verify
//!   ledgerseal --data-dir ./ledger inspect --tenant T1
//!   ledgerseal --config ledgerseal.toml purge --dry-run
//!
//! `verify` exits with status 0 when every tenant verifies and 1 otherwise,
//! including when a requested tenant has no ledger.  Any operational error
//! exits with status 2; `verify` still reports every other tenant first.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ledgerseal_contracts::{
    config::LedgerConfig,
    entry::{Action, Outcome, TenantId},
    error::{LedgerError, LedgerResult},
    report::ChainReport,
};
use ledgerseal_core::{
    assess::{requires_review, risk_level},
    stream::EntryStream,
    AuditLedger, EntryRecord, KeyRing, LedgerStore, PurgeStore,
};
use ledgerseal_retention::RetentionManager;
use ledgerseal_store::{FileLedgerStore, MemoryLedgerStore};
use ledgerseal_verify::{ChainVerifier, VerifyOptions};

// ── CLI definition ────────────────────────────────────────────────────────────

/// LedgerSeal: tamper-evident, per-tenant audit ledger.
#[derive(Parser)]
#[command(
    name = "ledgerseal",
    about = "Verify, inspect and maintain LedgerSeal audit ledgers",
    long_about = "Operates on the hash-chained audit ledger of every tenant in a data\n\
                  directory: chain verification, demo seeding, inspection and retention sweeps."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ledger data directory (overrides `store.data_dir`).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify tenant chains and print one OK/TAMPERED line per tenant.
    Verify {
        /// Tenant to verify; repeat for several.  Defaults to every tenant.
        #[arg(long = "tenant")]
        tenants: Vec<String>,
        /// Stop each scan after this many entries.
        #[arg(long)]
        max_entries: Option<u64>,
        /// Report unsigned entries as SIGNATURE_INVALID.
        #[arg(long)]
        require_signatures: bool,
    },
    /// Record the CREATE, VIEW, UPDATE, EXPORT, denied DELETE scenario.
    SeedDemo {
        #[arg(long)]
        tenant: String,
    },
    /// List a tenant's entries with their risk level.
    Inspect {
        #[arg(long)]
        tenant: String,
        /// First sequence to show.
        #[arg(long, default_value_t = 1)]
        from: u64,
    },
    /// Run a retention sweep over every tenant.
    Purge {
        /// Only show what would be purged.
        #[arg(long)]
        dry_run: bool,
    },
}

// ── Store selection ───────────────────────────────────────────────────────────

enum Backend {
    Memory(Arc<MemoryLedgerStore>),
    File(Arc<FileLedgerStore>),
}

impl Backend {
    fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        match &config.store.data_dir {
            Some(_) => Ok(Backend::File(Arc::new(FileLedgerStore::open(&config.store)?))),
            None => {
                eprintln!("note: no data directory configured, using a volatile in-memory store");
                Ok(Backend::Memory(Arc::new(MemoryLedgerStore::with_config(&config.store))))
            }
        }
    }

    fn ledger_store(&self) -> Arc<dyn LedgerStore> {
        match self {
            Backend::Memory(store) => store.clone(),
            Backend::File(store) => store.clone(),
        }
    }

    fn purge_store(&self) -> Arc<dyn PurgeStore> {
        match self {
            Backend::Memory(store) => store.clone(),
            Backend::File(store) => store.clone(),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=info (or debug) to see pipeline and verifier events.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("ledgerseal: {}", e);
            std::process::exit(2);
        }
    }
}

/// Returns `Ok(false)` when the command completed but found a problem.
fn run(cli: Cli) -> LedgerResult<bool> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = Some(dir);
    }
    config.validate()?;

    let backend = Backend::open(&config)?;
    let keys = KeyRing::from_config(&config.signing)?;

    match cli.command {
        Command::Verify {
            tenants,
            max_entries,
            require_signatures,
        } => {
            let options = VerifyOptions {
                require_signatures: require_signatures || config.verify.require_signatures,
                max_entries: max_entries.or(config.verify.max_entries),
                ..VerifyOptions::default()
            };
            verify(&backend, &keys, tenants, options)
        }
        Command::SeedDemo { tenant } => {
            let ledger = AuditLedger::new(backend.ledger_store(), Arc::new(keys), &config);
            seed_demo(&ledger, &tenant)?;
            Ok(true)
        }
        Command::Inspect { tenant, from } => {
            inspect(&backend, &TenantId::new(tenant), from)?;
            Ok(true)
        }
        Command::Purge { dry_run } => {
            let manager = RetentionManager::from_config(backend.purge_store(), &config.retention)?;
            purge(&backend, &manager, dry_run)
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn verify(
    backend: &Backend,
    keys: &KeyRing,
    tenants: Vec<String>,
    options: VerifyOptions,
) -> LedgerResult<bool> {
    let store = backend.ledger_store();
    let (tenants, unknown) = split_known(tenants, store.tenants()?);
    for tenant in &unknown {
        warn!(tenant = %tenant, "no ledger for requested tenant");
        println!("{:<8} {} no ledger in this store", "UNKNOWN", tenant);
    }

    let results = ChainVerifier::new(store.as_ref())
        .with_keys(keys)
        .with_options(options)
        .verify_tenants(&tenants);
    let mut all_verified = unknown.is_empty();
    let mut unreadable = 0usize;
    for (tenant, result) in tenants.iter().zip(&results) {
        match result {
            Ok(report) => {
                all_verified &= report.verified;
                print_report(report);
            }
            Err(e) => {
                unreadable += 1;
                error!(tenant = %tenant, error = %e, "tenant could not be verified");
                println!("{:<8} {} {}", "ERROR", tenant, e);
            }
        }
    }

    info!(tenants = results.len(), all_verified, unreadable, "verification run finished");
    if unreadable > 0 {
        return Err(LedgerError::store(format!("{} tenant(s) could not be read", unreadable)));
    }
    Ok(all_verified)
}

/// Split requested tenant names into those the store knows and those it does
/// not.  No names means every stored tenant.
fn split_known(requested: Vec<String>, stored: Vec<TenantId>) -> (Vec<TenantId>, Vec<TenantId>) {
    if requested.is_empty() {
        return (stored, Vec::new());
    }
    requested
        .into_iter()
        .map(TenantId::new)
        .partition(|tenant| stored.contains(tenant))
}

fn print_report(report: &ChainReport) {
    let status = if report.verified {
        "OK"
    } else if report.broken_links.is_empty() {
        "PARTIAL"
    } else {
        "TAMPERED"
    };
    let mut line = format!("{:<8} {} entries={}", status, report.tenant, report.entry_count);
    if !report.broken_links.is_empty() {
        line.push_str(&format!(" breaks={}", report.broken_links.len()));
    }
    if let Some(cp) = report.checkpoint_sequence {
        line.push_str(&format!(" checkpoint={}", cp));
    }
    if report.truncated {
        line.push_str(" truncated");
    }
    println!("{}", line);
    for link in &report.broken_links {
        println!("         seq={} {} {}", link.sequence, link.kind, link.reason);
    }
}

fn seed_demo(ledger: &AuditLedger, tenant: &str) -> LedgerResult<()> {
    let steps = [
        (Action::Create, Outcome::Success),
        (Action::View, Outcome::Success),
        (Action::Update, Outcome::Success),
        (Action::Export, Outcome::Success),
        (Action::Delete, Outcome::Denied),
    ];
    for (action, outcome) in steps {
        let event = ledger
            .event(tenant)
            .actor("demo-attorney")
            .action(action)
            .resource("matter", "M-2024-001")
            .outcome(outcome)
            .metadata("source", serde_json::json!("seed-demo"))
            .build()?;
        let entry = ledger.record(event)?;
        println!(
            "recorded {} seq={} {} {} {}",
            entry.tenant(),
            entry.sequence(),
            entry.body.action,
            entry.body.outcome,
            short(&entry.entry_hash)
        );
    }
    Ok(())
}

fn inspect(backend: &Backend, tenant: &TenantId, from: u64) -> LedgerResult<()> {
    let store = backend.ledger_store();
    let head = store.chain_head(tenant)?;
    if let Some(cp) = store.latest_checkpoint(tenant)? {
        println!("checkpoint seq={} hash={}", cp.sequence, short(&cp.entry_hash));
    }

    let stream = EntryStream::records(
        store.as_ref(),
        tenant.clone(),
        from.max(1),
        head.sequence,
        store.page_size(),
    );
    for record in stream {
        let entry = match record? {
            EntryRecord::Entry(entry) => entry,
            EntryRecord::Unreadable { sequence, reason } => {
                println!("{:>6}  unreadable: {}", sequence, reason);
                continue;
            }
        };
        let body = &entry.body;
        println!(
            "{:>6}  {}  {:<18} {:<8} {:<9} {:<20} {}{}",
            body.sequence,
            body.created_at.format("%Y-%m-%d %H:%M:%S"),
            body.action.as_str(),
            body.outcome.as_str(),
            risk_level(body).as_str(),
            body.resource.to_string(),
            body.actor,
            if requires_review(body) { "  [review]" } else { "" }
        );
    }
    Ok(())
}

fn purge(backend: &Backend, manager: &RetentionManager, dry_run: bool) -> LedgerResult<bool> {
    let now = Utc::now();
    if dry_run {
        for tenant in backend.ledger_store().tenants()? {
            match manager.plan(&tenant, now)? {
                Some(plan) => println!(
                    "would purge {} through seq={} ({} entries)",
                    tenant,
                    plan.checkpoint().sequence,
                    plan.checkpoint().purged_count
                ),
                None => println!("nothing to purge for {}", tenant),
            }
        }
        return Ok(true);
    }

    let mut clean = true;
    for outcome in manager.sweep(now)? {
        match (&outcome.checkpoint, &outcome.skipped) {
            (_, Some(reason)) => {
                clean = false;
                println!("skipped {}: {}", outcome.tenant, reason);
            }
            (Some(cp), None) => println!(
                "purged {} through seq={} ({} entries)",
                outcome.tenant, cp.sequence, outcome.purged
            ),
            (None, None) => println!("nothing to purge for {}", outcome.tenant),
        }
    }
    Ok(clean)
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
