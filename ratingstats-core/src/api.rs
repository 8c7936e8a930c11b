//! Endpoint semantics
//!
//! Plain functions behind the control panel pages and JSON endpoints. They
//! take already-parsed request parameters and return serializable values;
//! routing and transport belong to the host.

use crate::analytics::{DistributionSeries, FieldStatistics, TrendSeries};
use crate::error::{Error, Result};
use crate::export::{export_filename, ExportFormat};
use crate::field::RatingType;
use crate::jobs::{CacheRegenerationJob, JobQueue};
use crate::service::{FormOverview, StatisticsService};
use crate::types::{DateRange, GroupableField, RatingField};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// `{success, data}`, `{success, message}` or `{success: false, error}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T = ()> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error.into()),
        }
    }
}

// ============================================
// Form listing
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Title,
    RatingFieldCount,
    #[default]
    TotalSubmissions,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Title => "title",
            SortKey::RatingFieldCount => "ratingFieldCount",
            SortKey::TotalSubmissions => "totalSubmissions",
        }
    }

    /// Unknown keys sort by submission count
    pub fn parse_lenient(s: &str) -> SortKey {
        match s {
            "title" => SortKey::Title,
            "ratingFieldCount" => SortKey::RatingFieldCount,
            _ => SortKey::TotalSubmissions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    /// Anything but `asc` is descending
    pub fn parse_lenient(s: &str) -> SortDir {
        if s == "asc" {
            SortDir::Asc
        } else {
            SortDir::Desc
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub search: Option<String>,
    pub sort: SortKey,
    pub dir: SortDir,
    pub page: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormRow {
    pub id: i64,
    pub handle: String,
    pub title: String,
    pub rating_field_count: usize,
    pub total_submissions: usize,
}

impl From<FormOverview> for FormRow {
    fn from(overview: FormOverview) -> Self {
        Self {
            id: overview.form.id,
            handle: overview.form.handle,
            title: overview.form.title,
            rating_field_count: overview.rating_field_count,
            total_submissions: overview.total_submissions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormListing {
    pub forms: Vec<FormRow>,
    pub search: String,
    pub sort: &'static str,
    pub dir: &'static str,
    pub page: usize,
    pub limit: usize,
    pub offset: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Forms with rating fields, filtered, sorted and paginated
pub fn list_forms(
    service: &StatisticsService,
    query: &ListQuery,
    items_per_page: usize,
) -> Result<FormListing> {
    let search = query.search.clone().unwrap_or_default();
    let needle = search.to_lowercase();

    let mut rows: Vec<FormRow> = service
        .forms_with_rating_fields()?
        .into_iter()
        .map(FormRow::from)
        .filter(|row| {
            needle.is_empty()
                || row.title.to_lowercase().contains(&needle)
                || row.handle.to_lowercase().contains(&needle)
        })
        .collect();

    rows.sort_by(|a, b| {
        let ordering = match query.sort {
            SortKey::Title => a.title.cmp(&b.title),
            SortKey::RatingFieldCount => a.rating_field_count.cmp(&b.rating_field_count),
            SortKey::TotalSubmissions => a.total_submissions.cmp(&b.total_submissions),
        };
        match query.dir {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        }
    });

    let limit = items_per_page.max(1);
    let page = query.page.max(1);
    let total_items = rows.len();
    let total_pages = total_items.div_ceil(limit);
    let offset = (page - 1).saturating_mul(limit);
    let forms = rows.into_iter().skip(offset).take(limit).collect();

    Ok(FormListing {
        forms,
        search,
        sort: query.sort.as_str(),
        dir: query.dir.as_str(),
        page,
        limit,
        offset,
        total_pages,
        total_items,
    })
}

// ============================================
// Form detail
// ============================================

#[derive(Debug, Clone, Default)]
pub struct FormQuery {
    pub date_range: DateRange,
    pub group_by: Option<String>,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    pub handle: String,
    pub label: String,
    pub rating_type: RatingType,
}

impl From<&RatingField> for FieldRef {
    fn from(field: &RatingField) -> Self {
        Self {
            handle: field.handle.clone(),
            label: field.label.clone(),
            rating_type: field.config.rating_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDetail {
    pub form: FormRow,
    pub all_rating_fields: Vec<FieldRef>,
    pub rating_fields: Vec<FieldRef>,
    pub groupable_fields: Vec<GroupableField>,
    pub field_stats: BTreeMap<String, FieldStatistics>,
    pub date_range: DateRange,
    pub group_by: Option<String>,
    pub field_filter: Option<String>,
}

/// Statistics for every rating field on a form, optionally narrowed to one
/// field and grouped.
pub fn form_detail(service: &StatisticsService, form_id: i64, query: &FormQuery) -> Result<FormDetail> {
    let form = service.form(form_id)?;
    let all_fields = service.rating_fields(&form);
    if all_fields.is_empty() {
        return Err(Error::NoRatingFields(form_id));
    }

    let group_by = query.group_by.as_deref().filter(|g| !g.is_empty());
    let field_filter = query.field.as_deref().filter(|f| !f.is_empty());

    let shown: Vec<&RatingField> = all_fields
        .iter()
        .filter(|f| field_filter.map_or(true, |h| f.handle == h))
        .collect();

    let mut field_stats = BTreeMap::new();
    for field in &shown {
        let stats = service.field_statistics(&form, field, query.date_range, group_by)?;
        field_stats.insert(field.handle.clone(), stats);
    }

    Ok(FormDetail {
        all_rating_fields: all_fields.iter().map(FieldRef::from).collect(),
        rating_fields: shown.into_iter().map(FieldRef::from).collect(),
        groupable_fields: service.groupable_fields(&form),
        field_stats,
        date_range: query.date_range,
        group_by: group_by.map(str::to_string),
        field_filter: field_filter.map(str::to_string),
        form: FormRow {
            id: form.id,
            total_submissions: service.source().count_submissions(form.id)?,
            rating_field_count: all_fields.len(),
            handle: form.handle,
            title: form.title,
        },
    })
}

// ============================================
// Data endpoint
// ============================================

/// Request body of the data endpoint. Missing values use the endpoint
/// defaults (`all`, `summary`).
#[derive(Debug, Clone, Default)]
pub struct DataRequest {
    pub form_id: Option<i64>,
    pub field_handle: Option<String>,
    pub date_range: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryData {
    pub field_stats: BTreeMap<String, FieldStatistics>,
    pub total_submissions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataPayload {
    Summary(SummaryData),
    Trend(TrendSeries),
    Distribution(DistributionSeries),
}

pub fn get_data(service: &StatisticsService, request: &DataRequest) -> ApiResponse<DataPayload> {
    let Some(form_id) = request.form_id else {
        return ApiResponse::error("Form ID is required");
    };
    let form = match service.source().form(form_id) {
        Ok(Some(form)) => form,
        Ok(None) => return ApiResponse::error("Form not found"),
        Err(e) => return ApiResponse::error(e.to_string()),
    };
    let range = DateRange::parse_lenient(request.date_range.as_deref().unwrap_or("all"));
    let kind = request.kind.as_deref().unwrap_or("summary");

    let result = match kind {
        "summary" => summary_data(service, &form, range).map(DataPayload::Summary),
        "trend" | "distribution" => {
            let Some(handle) = request.field_handle.as_deref().filter(|h| !h.is_empty()) else {
                return ApiResponse::error("Field handle is required");
            };
            let Some(field) = service.rating_field(&form, handle) else {
                return ApiResponse::error("Field not found");
            };
            if kind == "trend" {
                service.trend_data(&form, &field, range).map(DataPayload::Trend)
            } else {
                service
                    .distribution_data(&form, &field, range)
                    .map(DataPayload::Distribution)
            }
        }
        other => return ApiResponse::error(format!("Unknown data type: {}", other)),
    };

    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            tracing::error!(form_id, error = %e, "Error getting statistics data");
            ApiResponse::error(e.to_string())
        }
    }
}

fn summary_data(
    service: &StatisticsService,
    form: &crate::types::Form,
    range: DateRange,
) -> Result<SummaryData> {
    let mut field_stats = BTreeMap::new();
    for field in service.rating_fields(form) {
        let stats = service.field_statistics(form, &field, range, None)?;
        field_stats.insert(field.handle, stats);
    }
    Ok(SummaryData {
        field_stats,
        total_submissions: service.total_submissions(form, range)?,
    })
}

// ============================================
// Cache endpoints
// ============================================

pub fn clear_cache(service: &StatisticsService, form_id: Option<i64>) -> ApiResponse {
    let Some(form_id) = form_id else {
        return ApiResponse::error("Form ID is required");
    };
    service.clear_cache_for_form(form_id);
    ApiResponse::message("Statistics cache cleared")
}

pub fn clear_all(service: &StatisticsService) -> ApiResponse {
    service.clear_all_cache();
    ApiResponse::message("Cache cleared successfully")
}

/// Queue a one-off regeneration of every form
pub fn generate_all(queue: &dyn JobQueue) -> ApiResponse {
    match queue.push(&CacheRegenerationJob::master(None, false), None) {
        Ok(id) => {
            tracing::info!(job_id = id, "Cache generation started");
            ApiResponse::message("Cache generation started")
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start cache generation");
            ApiResponse::error(e.to_string())
        }
    }
}

// ============================================
// Export endpoint
// ============================================

#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub date_range: DateRange,
    pub group_by: Option<String>,
    /// With `group_by`, export only the submissions of this group
    pub group_value: Option<String>,
    pub format: ExportFormat,
}

/// A downloadable export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub body: String,
}

pub fn export(
    service: &StatisticsService,
    plugin_name: &str,
    form_id: i64,
    request: &ExportRequest,
    today: NaiveDate,
) -> Result<ExportFile> {
    let form = service.form(form_id)?;
    let range = request.date_range;
    let group_by = request.group_by.as_deref().filter(|g| !g.is_empty());
    let group_value = request.group_value.as_deref().filter(|v| !v.is_empty());

    let (format, body) = match (group_by, group_value) {
        (Some(group_by), Some(value)) => (
            ExportFormat::Csv,
            service.generate_group_csv_export(&form, group_by, value, range)?,
        ),
        _ => match request.format {
            ExportFormat::Csv => (ExportFormat::Csv, service.generate_csv_export(&form, range, group_by)?),
            ExportFormat::Json => (
                ExportFormat::Json,
                service.generate_json_export(&form, range, group_by)?,
            ),
        },
    };

    Ok(ExportFile {
        filename: export_filename(plugin_name, &form.handle, group_value, range, format, today),
        mime_type: format.mime_type(),
        body,
    })
}
