//! CSV and JSON exports
//!
//! Ungrouped exports list raw submissions; grouped exports list one row per
//! group with per-field aggregates. Exports are never cached, but grouped
//! exports read statistics through the cache like any other caller.

use crate::analytics::{FieldStatistics, GroupMetrics, GroupStats, RatingMetrics};
use crate::error::Result;
use crate::format::{format_number, pluralize, slugify};
use crate::service::StatisticsService;
use crate::types::{DateRange, FieldValue, Form, RatingField, Submission};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(format!("unknown export format: {}", s)),
        }
    }
}

/// `{plural-plugin-name}-statistics-{form}[-{group}]-{range}-{date}.{ext}`
pub fn export_filename(
    plugin_name: &str,
    form_handle: &str,
    group_value: Option<&str>,
    range: DateRange,
    format: ExportFormat,
    date: NaiveDate,
) -> String {
    let mut name = format!("{}-statistics-{}", slugify(&pluralize(plugin_name)), form_handle);
    if let Some(group) = group_value.map(slugify).filter(|g| !g.is_empty()) {
        name.push('-');
        name.push_str(&group);
    }
    format!(
        "{}-{}-{}.{}",
        name,
        range.export_label(),
        date.format("%Y-%m-%d"),
        format.as_str()
    )
}

// ============================================
// CSV helpers
// ============================================

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn build_csv(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in rows {
        let line: Vec<String> = row.iter().map(|cell| csv_escape(cell)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn local_timestamp(submission: &Submission) -> String {
    submission
        .created_at
        .with_timezone(&Local)
        .format(DATE_TIME_FORMAT)
        .to_string()
}

fn submission_rows(submissions: &[Submission], fields: &[RatingField]) -> Vec<Vec<String>> {
    let mut header = vec!["Submission Date".to_string(), "Submission ID".to_string()];
    header.extend(fields.iter().map(|f| f.label.clone()));

    let mut rows = vec![header];
    for submission in submissions {
        let mut row = vec![local_timestamp(submission), submission.id.to_string()];
        row.extend(fields.iter().map(|f| {
            submission
                .value(&f.handle)
                .map(FieldValue::display)
                .unwrap_or_default()
        }));
        rows.push(row);
    }
    rows
}

fn count_with_percentage(count: usize, percentage: f64) -> String {
    format!("{} ({}%)", count, format_number(percentage))
}

fn group_cells(field: &RatingField, group: Option<&GroupStats>) -> Vec<String> {
    match group.map(|g| &g.metrics) {
        Some(GroupMetrics::Nps(m)) => vec![
            format_number(m.nps_score),
            count_with_percentage(m.promoters, m.promoters_percentage),
            count_with_percentage(m.passives, m.passives_percentage),
            count_with_percentage(m.detractors, m.detractors_percentage),
        ],
        Some(GroupMetrics::Scale(s)) => vec![format_number(s.average), format_number(s.median)],
        None => {
            let width = if field.config.rating_type.is_nps() { 4 } else { 2 };
            vec![String::new(); width]
        }
    }
}

// ============================================
// JSON shapes
// ============================================

#[derive(Serialize)]
struct FormRef<'a> {
    id: i64,
    title: &'a str,
    handle: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    form: FormRef<'a>,
    date_range: &'static str,
    exported_at: String,
    fields: Vec<GroupedFieldExport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submissions: Option<Vec<SubmissionExport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<BTreeMap<String, SummaryExport>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupedFieldExport {
    handle: String,
    label: String,
    rating_type: &'static str,
    groups: Vec<GroupStats>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionExport {
    id: i64,
    date_created: String,
    ratings: BTreeMap<String, RatingExport>,
}

#[derive(Serialize)]
struct RatingExport {
    label: String,
    value: Option<FieldValue>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryExport {
    label: String,
    rating_type: &'static str,
    total_responses: usize,
    average: Option<f64>,
    median: Option<f64>,
    mode: Option<f64>,
    nps_score: Option<f64>,
    promoters: Option<usize>,
    passives: Option<usize>,
    detractors: Option<usize>,
}

impl SummaryExport {
    fn new(field: &RatingField, stats: &FieldStatistics) -> Self {
        let mut export = SummaryExport {
            label: field.label.clone(),
            rating_type: field.config.rating_type.as_str(),
            ..Default::default()
        };
        if let Some(summary) = stats.as_summary() {
            export.total_responses = summary.total_responses;
            match &summary.metrics {
                RatingMetrics::Scale(s) => {
                    export.average = Some(s.average);
                    export.median = Some(s.median);
                    export.mode = s.mode;
                }
                RatingMetrics::Nps(n) => {
                    export.average = Some(n.average);
                    export.nps_score = Some(n.nps_score);
                    export.promoters = Some(n.promoters);
                    export.passives = Some(n.passives);
                    export.detractors = Some(n.detractors);
                }
            }
        }
        export
    }
}

// ============================================
// Exports
// ============================================

impl StatisticsService {
    /// CSV export; empty when the form has no rating fields.
    pub fn generate_csv_export(
        &self,
        form: &Form,
        range: DateRange,
        group_by: Option<&str>,
    ) -> Result<String> {
        let fields = self.rating_fields(form);
        if fields.is_empty() {
            return Ok(String::new());
        }

        let rows = match group_by.filter(|g| !g.is_empty()) {
            Some(group_by) => self.grouped_rows(form, &fields, range, group_by)?,
            None => submission_rows(&self.submissions(form, range)?, &fields),
        };

        tracing::info!(
            form_id = form.id,
            range = %range,
            rows = rows.len().saturating_sub(1),
            "Generated CSV export"
        );
        Ok(build_csv(&rows))
    }

    fn grouped_rows(
        &self,
        form: &Form,
        fields: &[RatingField],
        range: DateRange,
        group_by: &str,
    ) -> Result<Vec<Vec<String>>> {
        let group_label = form
            .field(group_by)
            .map(|f| f.label.clone())
            .unwrap_or_else(|| group_by.to_string());

        let mut header = vec![group_label, "Submissions Count".to_string()];
        for field in fields {
            if field.config.rating_type.is_nps() {
                for suffix in ["NPS Score", "Promoters", "Passives", "Detractors"] {
                    header.push(format!("{} - {}", field.label, suffix));
                }
            } else {
                header.push(format!("{} - Average", field.label));
                header.push(format!("{} - Median", field.label));
            }
        }

        let per_field: Vec<FieldStatistics> = fields
            .iter()
            .map(|f| self.field_statistics(form, f, range, Some(group_by)))
            .collect::<Result<_>>()?;

        let mut rows = vec![header];
        // Groups come from the first rating field
        let groups = per_field
            .first()
            .and_then(FieldStatistics::as_grouped)
            .map(|g| g.groups.clone())
            .unwrap_or_default();

        for group in &groups {
            let mut row = vec![group.label.clone(), group.count.to_string()];
            for (field, stats) in fields.iter().zip(&per_field) {
                let matching = stats.as_grouped().and_then(|g| g.group(&group.label));
                row.extend(group_cells(field, matching));
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Pretty-printed JSON export.
    pub fn generate_json_export(
        &self,
        form: &Form,
        range: DateRange,
        group_by: Option<&str>,
    ) -> Result<String> {
        let fields = self.rating_fields(form);
        if fields.is_empty() {
            return Ok(serde_json::to_string_pretty(
                &serde_json::json!({ "error": "No rating fields found" }),
            )?);
        }

        let mut export = JsonExport {
            form: FormRef {
                id: form.id,
                title: &form.title,
                handle: &form.handle,
            },
            date_range: range.as_str(),
            exported_at: Local::now().format(DATE_TIME_FORMAT).to_string(),
            fields: Vec::new(),
            group_by: None,
            submissions: None,
            summary: None,
        };

        match group_by.filter(|g| !g.is_empty()) {
            Some(group_by) => {
                export.group_by = Some(group_by);
                for field in &fields {
                    let stats = self.field_statistics(form, field, range, Some(group_by))?;
                    export.fields.push(GroupedFieldExport {
                        handle: field.handle.clone(),
                        label: field.label.clone(),
                        rating_type: field.config.rating_type.as_str(),
                        groups: stats.as_grouped().map(|g| g.groups.clone()).unwrap_or_default(),
                    });
                }
            }
            None => {
                let submissions = self
                    .submissions(form, range)?
                    .iter()
                    .map(|s| SubmissionExport {
                        id: s.id,
                        date_created: local_timestamp(s),
                        ratings: fields
                            .iter()
                            .map(|f| {
                                (
                                    f.handle.clone(),
                                    RatingExport {
                                        label: f.label.clone(),
                                        value: s.value(&f.handle).cloned(),
                                    },
                                )
                            })
                            .collect(),
                    })
                    .collect();
                export.submissions = Some(submissions);

                let mut summary = BTreeMap::new();
                for field in &fields {
                    let stats = self.field_statistics(form, field, range, None)?;
                    summary.insert(field.handle.clone(), SummaryExport::new(field, &stats));
                }
                export.summary = Some(summary);
            }
        }

        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// CSV of the submissions in one group
    pub fn generate_group_csv_export(
        &self,
        form: &Form,
        group_by: &str,
        group_value: &str,
        range: DateRange,
    ) -> Result<String> {
        let fields = self.rating_fields(form);
        let submissions = self.group_submissions(form, group_by, group_value, range)?;
        Ok(build_csv(&submission_rows(&submissions, &fields)))
    }
}
