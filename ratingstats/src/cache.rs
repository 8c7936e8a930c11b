//! ratingstats-cache - manage the statistics cache
//!
//! Clears cached statistics, shows where they live and queues (or runs)
//! cache regeneration.

mod runtime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ratingstats_core::api;
use ratingstats_core::jobs::{JobQueue, JobStatus};
use ratingstats_core::{CacheRegenerationJob, Worker};
use runtime::Runtime;

#[derive(Parser)]
#[command(name = "ratingstats-cache")]
#[command(about = "Manage the rating statistics cache")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clear every cached statistic
    Clear,

    /// Clear cached statistics for a form
    ClearForm { form_id: i64 },

    /// Show cache storage and entry count
    Info,

    /// Queue cache regeneration
    Regenerate {
        /// Only regenerate this form
        #[arg(long)]
        form_id: Option<i64>,

        /// Process the queue now instead of leaving it to a worker
        #[arg(long)]
        run: bool,
    },

    /// Show recent regeneration jobs
    Status {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let rt = Runtime::open("ratingstats-cache")?;

    match args.command {
        Command::Clear => cmd_clear(&rt),
        Command::ClearForm { form_id } => {
            let response = api::clear_cache(&rt.service, Some(form_id));
            print_response(&response)
        }
        Command::Info => cmd_info(&rt),
        Command::Regenerate { form_id, run } => cmd_regenerate(&rt, form_id, run),
        Command::Status { limit } => cmd_status(&rt, limit),
    }
}

fn print_response(response: &api::ApiResponse) -> Result<()> {
    match (&response.message, &response.error) {
        (Some(message), _) if response.success => println!("{}", message),
        (_, Some(error)) => anyhow::bail!("{}", error),
        _ => {}
    }
    Ok(())
}

fn cmd_clear(rt: &Runtime) -> Result<()> {
    let count = rt.service.cache_count();
    if count == 0 {
        println!("No cache files to clear.");
        return Ok(());
    }

    println!("Found {} cache file(s).", count);
    if rt.service.clear_all_cache() {
        println!("Successfully cleared all statistics cache files.");
        Ok(())
    } else {
        anyhow::bail!("Some cache files could not be removed");
    }
}

fn cmd_info(rt: &Runtime) -> Result<()> {
    let info = rt.service.cache_info();
    println!("Storage:  {}", info.storage);
    println!("Location: {}", info.location);
    println!("Entries:  {}", info.entries);
    println!("Schedule: {}", rt.config.cache.schedule);
    println!("Worker log: {}", ratingstats_core::logging::log_file_path("ratingstats-worker").display());
    Ok(())
}

fn cmd_regenerate(rt: &Runtime, form_id: Option<i64>, run: bool) -> Result<()> {
    match form_id {
        None => print_response(&api::generate_all(rt.db.as_ref()))?,
        Some(id) => {
            let job_id = rt
                .db
                .push(&CacheRegenerationJob::master(Some(id), false), None)
                .context("failed to queue cache regeneration")?;
            println!("Queued cache regeneration for form {} (job {})", id, job_id);
        }
    }

    if !run {
        return Ok(());
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let worker = Worker::new(rt.service.clone(), rt.db.clone(), rt.config.cache.schedule);
    let mut done = 0u64;
    let summary = worker
        .drain(|report| {
            done += 1;
            let pending = rt.db.pending().unwrap_or(0) as u64;
            pb.set_length(done + pending);
            pb.set_position(done);
            pb.set_message(report.job.description(&rt.config.plugin_name));
        })
        .context("cache regeneration failed")?;

    pb.finish_and_clear();

    println!("Regeneration complete:");
    println!("  Jobs completed: {}", summary.completed);
    println!("  Jobs failed:    {}", summary.failed);
    println!("  Cache entries:  {}", rt.service.cache_count());

    tracing::info!(
        completed = summary.completed,
        failed = summary.failed,
        "ratingstats-cache regenerate complete"
    );

    if summary.failed > 0 {
        anyhow::bail!("{} regeneration job(s) failed", summary.failed);
    }
    Ok(())
}

fn cmd_status(rt: &Runtime, limit: usize) -> Result<()> {
    let jobs = rt.db.recent_jobs(limit).context("failed to load jobs")?;
    if jobs.is_empty() {
        println!("No regeneration jobs.");
        return Ok(());
    }

    for job in jobs {
        let state = match job.status {
            JobStatus::Waiting => format!("waiting until {}", job.available_at.format("%Y-%m-%d %H:%M")),
            JobStatus::Reserved => format!("running {:.0}%", job.progress * 100.0),
            JobStatus::Done => "done".to_string(),
            JobStatus::Failed => format!("failed: {}", job.error.as_deref().unwrap_or("unknown error")),
        };
        println!(
            "{:>6}  {:<60}  {}",
            job.id,
            job.job.description(&rt.config.plugin_name),
            state
        );
    }
    Ok(())
}
