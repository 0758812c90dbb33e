//! payout-runner: cron entry point for the commission and payout jobs.
//!
//! Usage:
//!   payout-runner --job daily   --db payouts.db
//!   payout-runner --job health  --db payouts.db --config payouts.json
//!   payout-runner --job daily   --db payouts.db --dry-run
//!
//! No live payment processor is wired into this binary. A normal daily run
//! settles funds and releases stuck payouts but skips automatic payouts,
//! and reports the skip. `--dry-run` runs the full job against the sandbox
//! processor and rolls every write back.
//!
//! Prints the job summary as JSON. Exits non-zero when the health check
//! reports issues.

use anyhow::Result;
use marketplace_payouts_core::{
    clock::SystemClock,
    config::EngineConfig,
    engine::PayoutEngine,
    jobs::{JobKind, JobSummary},
    payment_transfer::SandboxTransfer,
    store::LedgerStore,
};
use std::env;

#[derive(serde::Serialize)]
struct RunReport<'a> {
    job: JobKind,
    db: &'a str,
    dry_run: bool,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
    summary: &'a JobSummary,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = arg_value(&args, "--db").unwrap_or("payouts.db");
    let job: JobKind = match arg_value(&args, "--job") {
        Some(raw) => raw.parse()?,
        None => anyhow::bail!("missing --job <daily|weekly|monthly|health>"),
    };
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let config = match arg_value(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    log::info!("payout-runner: job={job:?} db={db} dry_run={dry_run}");

    let store = LedgerStore::open(db)?;
    let engine = PayoutEngine::build(
        store,
        config,
        Box::new(SystemClock),
        Box::new(SandboxTransfer::new()),
    )?;

    let started_at = chrono::Utc::now();
    let summary = if dry_run {
        engine.dry_run_job(job)?
    } else {
        engine.without_automatic_payouts().run_job(job)
    };
    let report = RunReport {
        job,
        db,
        dry_run,
        started_at,
        finished_at: chrono::Utc::now(),
        summary: &summary,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let JobSummary::Health(health) = &summary {
        if !health.healthy {
            std::process::exit(2);
        }
    }
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
