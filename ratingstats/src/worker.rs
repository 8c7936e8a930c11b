//! ratingstats-worker - process cache regeneration jobs
//!
//! Pulls master and batch jobs from the persistent queue. With a daily or
//! weekly schedule it makes sure a self-rescheduling master job is queued.

mod runtime;

use anyhow::{Context, Result};
use clap::Parser;
use ratingstats_core::jobs::{schedule_initial, JobOutcome, JobReport, RegenerationTicker};
use ratingstats_core::Worker;
use runtime::Runtime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ratingstats-worker")]
#[command(about = "Process rating statistics cache regeneration jobs")]
#[command(version)]
struct Args {
    /// Process runnable jobs once and exit
    #[arg(long)]
    once: bool,

    /// Also enqueue master jobs from an in-process timer
    #[arg(long)]
    ticker: bool,

    /// Queue poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_ms: u64,

    /// Minutes before an unfinished reservation is returned to the queue
    #[arg(long, default_value = "15")]
    stale_minutes: i64,

    /// Print each processed job
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let rt = Runtime::open("ratingstats-worker")?;
    let schedule = rt.config.cache.schedule;

    if let Some(job_id) =
        schedule_initial(rt.db.as_ref(), schedule).context("failed to schedule regeneration")?
    {
        println!("Scheduled {} cache regeneration (job {})", schedule, job_id);
    }

    let worker = Worker::new(rt.service.clone(), rt.db.clone(), schedule)
        .with_stale_after(chrono::Duration::minutes(args.stale_minutes));

    if args.once {
        let summary = worker
            .drain(|report| {
                if args.verbose {
                    print_report(&rt, report);
                }
            })
            .context("worker failed")?;
        println!(
            "Processed {} job(s), {} failed",
            summary.completed + summary.failed,
            summary.failed
        );
        return Ok(());
    }

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let ticker = if args.ticker {
        RegenerationTicker::start(rt.db.clone(), schedule)
    } else {
        None
    };

    println!(
        "Worker active (poll every {}ms, schedule {}). Press Ctrl+C to stop.",
        args.poll_ms, schedule
    );

    let summary = worker
        .run(Duration::from_millis(args.poll_ms), &running)
        .context("worker failed")?;

    if let Some(ticker) = ticker {
        ticker.stop();
    }

    println!(
        "Worker stopped: {} completed, {} failed",
        summary.completed, summary.failed
    );
    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        "ratingstats-worker stopped"
    );
    Ok(())
}

fn print_report(rt: &Runtime, report: &JobReport) {
    let description = report.job.description(&rt.config.plugin_name);
    let status = match &report.result {
        Ok(JobOutcome::Enqueued {
            batches,
            rescheduled: true,
        }) => format!("queued {} batch(es), rescheduled", batches),
        Ok(JobOutcome::Enqueued { batches, .. }) => format!("queued {} batch(es)", batches),
        Ok(JobOutcome::Computed { progress }) => format!("{:.0}%", progress * 100.0),
        Ok(JobOutcome::Skipped) => "skipped".to_string(),
        Err(e) => format!("failed: {}", e),
    };
    println!("[{}] {} ... {}", report.id, description, status);
}
