//! ratingstats - query and export rating field statistics
//!
//! Reads forms and submissions from the reference host database and serves
//! statistics through the cache, the same way the control panel would.
//!
//! File locations follow XDG base directories:
//! - Database: $XDG_DATA_HOME/ratingstats/data.db (~/.local/share/ratingstats/data.db)
//! - Cache: $XDG_CACHE_HOME/ratingstats/statistics/ (~/.cache/ratingstats/statistics/)
//! - Logs: $XDG_STATE_HOME/ratingstats/ratingstats.log
//! - Config: $XDG_CONFIG_HOME/ratingstats/config.toml

mod runtime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use ratingstats_core::analytics::{FieldStatistics, GroupMetrics, RatingMetrics};
use ratingstats_core::api::{self, DataRequest, ExportRequest, FormQuery, ListQuery, SortDir, SortKey};
use ratingstats_core::export::ExportFormat;
use ratingstats_core::format::{format_number, format_number_opt};
use ratingstats_core::{DateRange, FieldValue, FormDefinition, SubmissionEvents};
use runtime::Runtime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ratingstats")]
#[command(about = "Query and export rating field statistics")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List forms that have rating fields
    Forms {
        /// Filter by title or handle (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,

        /// Sort by: title, ratingFieldCount, totalSubmissions
        #[arg(long, default_value = "totalSubmissions")]
        sort: String,

        /// Sort direction: asc or desc
        #[arg(long, default_value = "desc")]
        dir: String,

        /// Page number (1-based)
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show statistics for every rating field on a form
    Form {
        form_id: i64,

        /// today, yesterday, last7days, last30days, last90days or all
        #[arg(short, long, default_value = "all")]
        date_range: String,

        /// Group results by this field handle
        #[arg(short, long)]
        group_by: Option<String>,

        /// Only show this rating field
        #[arg(short, long)]
        field: Option<String>,

        /// Print the page data as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a data endpoint response as JSON
    Data {
        form_id: Option<i64>,

        /// summary, trend or distribution
        #[arg(short = 't', long = "type", default_value = "summary")]
        kind: String,

        /// Rating field handle (trend and distribution)
        #[arg(short, long)]
        field: Option<String>,

        #[arg(short, long, default_value = "all")]
        date_range: String,
    },

    /// Print the submissions of one group as CSV
    Group {
        form_id: i64,

        #[arg(short, long)]
        group_by: String,

        /// Group value, e.g. "(Not Set)"
        #[arg(long)]
        value: String,

        #[arg(short, long, default_value = "all")]
        date_range: String,
    },

    /// Export statistics to a CSV or JSON file
    Export {
        form_id: i64,

        /// csv or json
        #[arg(short, long, default_value = "csv")]
        format: String,

        #[arg(short, long, default_value = "all")]
        date_range: String,

        #[arg(short, long)]
        group_by: Option<String>,

        /// With --group-by, export only the submissions of this group
        #[arg(long)]
        group_value: Option<String>,

        /// Output directory (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import form definitions from a JSON file (one form or an array)
    FormsImport { file: PathBuf },

    /// Store a submission and run the save hook
    Submit {
        form_id: i64,

        /// Field value as handle=value; JSON values are parsed
        #[arg(short, long = "value")]
        values: Vec<String>,

        /// Creation time (RFC 3339); defaults to now
        #[arg(long)]
        created_at: Option<String>,
    },

    /// Delete a submission and run the delete hook
    Delete { submission_id: i64 },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let rt = Runtime::open("ratingstats")?;

    match args.command {
        Command::Forms {
            search,
            sort,
            dir,
            page,
            json,
        } => cmd_forms(&rt, search, &sort, &dir, page, json),
        Command::Form {
            form_id,
            date_range,
            group_by,
            field,
            json,
        } => cmd_form(&rt, form_id, &date_range, group_by, field, json),
        Command::Data {
            form_id,
            kind,
            field,
            date_range,
        } => cmd_data(&rt, form_id, kind, field, date_range),
        Command::Group {
            form_id,
            group_by,
            value,
            date_range,
        } => cmd_group(&rt, form_id, &group_by, &value, &date_range),
        Command::Export {
            form_id,
            format,
            date_range,
            group_by,
            group_value,
            output,
        } => cmd_export(&rt, form_id, &format, &date_range, group_by, group_value, output),
        Command::FormsImport { file } => cmd_forms_import(&rt, &file),
        Command::Submit {
            form_id,
            values,
            created_at,
        } => cmd_submit(&rt, form_id, &values, created_at.as_deref()),
        Command::Delete { submission_id } => cmd_delete(&rt, submission_id),
    }
}

fn parse_range(s: &str) -> Result<DateRange> {
    s.parse::<DateRange>().map_err(anyhow::Error::msg)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

// ============================================
// Queries
// ============================================

fn cmd_forms(
    rt: &Runtime,
    search: Option<String>,
    sort: &str,
    dir: &str,
    page: usize,
    json: bool,
) -> Result<()> {
    let query = ListQuery {
        search,
        sort: SortKey::parse_lenient(sort),
        dir: SortDir::parse_lenient(dir),
        page,
    };
    let listing = api::list_forms(&rt.service, &query, rt.config.statistics.items_per_page)
        .context("failed to list forms")?;

    if json {
        return print_json(&listing);
    }

    if listing.forms.is_empty() {
        println!("No forms with rating fields found.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<30}  {:<24}  {:>13}  {:>11}",
        "ID", "Title", "Handle", "Rating fields", "Submissions"
    );
    for row in &listing.forms {
        println!(
            "{:>6}  {:<30}  {:<24}  {:>13}  {:>11}",
            row.id, row.title, row.handle, row.rating_field_count, row.total_submissions
        );
    }
    println!();
    println!(
        "Page {} of {} ({} form(s))",
        listing.page,
        listing.total_pages.max(1),
        listing.total_items
    );
    Ok(())
}

fn cmd_form(
    rt: &Runtime,
    form_id: i64,
    date_range: &str,
    group_by: Option<String>,
    field: Option<String>,
    json: bool,
) -> Result<()> {
    let query = FormQuery {
        date_range: parse_range(date_range)?,
        group_by,
        field,
    };
    let detail = api::form_detail(&rt.service, form_id, &query)
        .with_context(|| format!("failed to load statistics for form {}", form_id))?;

    if json {
        return print_json(&detail);
    }

    println!("{} ({})", detail.form.title, detail.form.handle);
    println!("Date range: {}", detail.date_range.label());
    println!("Submissions: {}", detail.form.total_submissions);

    for field in &detail.rating_fields {
        let Some(stats) = detail.field_stats.get(&field.handle) else {
            continue;
        };
        println!();
        println!("{} [{}]", field.label, field.rating_type);
        print_statistics(stats);
    }
    Ok(())
}

fn print_statistics(stats: &FieldStatistics) {
    match stats {
        FieldStatistics::Summary(summary) => {
            println!("  Responses: {}", summary.total_responses);
            match &summary.metrics {
                RatingMetrics::Scale(m) => {
                    println!("  Average:   {}", format_number(m.average));
                    println!("  Median:    {}", format_number(m.median));
                    println!("  Mode:      {}", format_number_opt(m.mode));
                    for bucket in &m.distribution {
                        println!(
                            "    {:>4}: {:>5} ({}%)",
                            format_number(bucket.value),
                            bucket.count,
                            format_number(bucket.percentage)
                        );
                    }
                }
                RatingMetrics::Nps(m) => {
                    println!("  NPS:        {}", format_number(m.nps_score));
                    println!("  Promoters:  {} ({}%)", m.promoters, format_number(m.promoters_percentage));
                    println!("  Passives:   {} ({}%)", m.passives, format_number(m.passives_percentage));
                    println!(
                        "  Detractors: {} ({}%)",
                        m.detractors,
                        format_number(m.detractors_percentage)
                    );
                }
            }
        }
        FieldStatistics::Grouped(grouped) => {
            println!("  Grouped by {} ({} groups)", grouped.group_by_label, grouped.total_groups);
            for group in &grouped.groups {
                match &group.metrics {
                    GroupMetrics::Scale(s) => println!(
                        "    {:<24} {:>5}  avg {}  median {}",
                        group.label,
                        group.count,
                        format_number(s.average),
                        format_number(s.median)
                    ),
                    GroupMetrics::Nps(n) => println!(
                        "    {:<24} {:>5}  NPS {}",
                        group.label,
                        group.count,
                        format_number(n.nps_score)
                    ),
                }
            }
        }
    }
}

fn cmd_data(
    rt: &Runtime,
    form_id: Option<i64>,
    kind: String,
    field: Option<String>,
    date_range: String,
) -> Result<()> {
    let request = DataRequest {
        form_id,
        field_handle: field,
        date_range: Some(date_range),
        kind: Some(kind),
    };
    let response = api::get_data(&rt.service, &request);
    print_json(&response)?;
    if !response.success {
        anyhow::bail!("data request failed");
    }
    Ok(())
}

fn cmd_group(rt: &Runtime, form_id: i64, group_by: &str, value: &str, date_range: &str) -> Result<()> {
    let form = rt.service.form(form_id)?;
    let csv = rt
        .service
        .generate_group_csv_export(&form, group_by, value, parse_range(date_range)?)
        .context("failed to export group")?;
    print!("{}", csv);
    Ok(())
}

fn cmd_export(
    rt: &Runtime,
    form_id: i64,
    format: &str,
    date_range: &str,
    group_by: Option<String>,
    group_value: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let request = ExportRequest {
        date_range: parse_range(date_range)?,
        group_by,
        group_value,
        format: format.parse::<ExportFormat>().map_err(anyhow::Error::msg)?,
    };
    let file = api::export(
        &rt.service,
        &rt.config.plugin_name,
        form_id,
        &request,
        Local::now().date_naive(),
    )
    .context("failed to generate export")?;

    let dir = output.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(&file.filename);
    std::fs::write(&path, &file.body)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(form_id, path = %path.display(), mime_type = file.mime_type, "Export written");
    println!("Exported {}", path.display());
    Ok(())
}

// ============================================
// Reference host operations
// ============================================

fn cmd_forms_import(rt: &Runtime, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw).context("invalid JSON")?;
    let definitions: Vec<FormDefinition> = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|d| vec![d])
    }
    .context("invalid form definition")?;

    for definition in definitions {
        let form = rt
            .db
            .import_form(definition, &rt.config.fields)
            .context("failed to import form")?;
        println!(
            "Imported form {} ({}) with {} rating field(s)",
            form.id,
            form.handle,
            form.rating_fields().len()
        );
    }
    Ok(())
}

fn parse_value(raw: &str) -> Option<FieldValue> {
    let json = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    FieldValue::from_json(&json)
}

fn cmd_submit(rt: &Runtime, form_id: i64, pairs: &[String], created_at: Option<&str>) -> Result<()> {
    let mut values = BTreeMap::new();
    for pair in pairs {
        let (handle, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected handle=value, got '{}'", pair))?;
        if let Some(value) = parse_value(raw) {
            values.insert(handle.to_string(), value);
        }
    }

    let created_at = match created_at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid timestamp '{}'", s))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let submission = rt.db.insert_submission(form_id, created_at, values)?;
    let events = SubmissionEvents::new(rt.service.clone(), rt.config.cache.schedule);
    let invalidated = events.on_submission_saved(form_id);

    println!("Stored submission {} for form {}", submission.id, form_id);
    if invalidated {
        println!("Statistics cache cleared");
    }
    Ok(())
}

fn cmd_delete(rt: &Runtime, submission_id: i64) -> Result<()> {
    let Some(form_id) = rt.db.delete_submission(submission_id)? else {
        anyhow::bail!("No submission with id {}", submission_id);
    };
    let events = SubmissionEvents::new(rt.service.clone(), rt.config.cache.schedule);
    let invalidated = events.on_submission_deleted(form_id);

    println!("Deleted submission {} from form {}", submission_id, form_id);
    if invalidated {
        println!("Statistics cache cleared");
    }
    Ok(())
}
