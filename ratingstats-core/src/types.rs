//! Core domain types for ratingstats
//!
//! These types describe what the statistics engine reads from the host:
//! forms with their field descriptors, submissions with their field values,
//! and the date range tokens that scope every query.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Form** | A host form with an ordered list of fields |
//! | **Rating field** | A field whose values are star, emoji or NPS ratings |
//! | **Grouping field** | A non-rating field whose value partitions statistics |
//! | **Submission** | One completed form entry with its field values |
//! | **Date range** | Token selecting the observation window and trend granularity |

use crate::config::FieldsConfig;
use crate::error::{Error, Result};
use crate::field::{RatingFieldConfig, RatingFieldSettings};
use crate::format::format_number;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label used for submissions whose grouping value is missing or empty
pub const NOT_SET_LABEL: &str = "(Not Set)";

/// Host field kind for rating fields
pub const RATING_KIND: &str = "rating";

/// Host field kinds that can partition statistics
pub const GROUPABLE_KINDS: [&str; 6] = [
    "plain_text",
    "hidden",
    "dropdown",
    "radio_buttons",
    "entries",
    "categories",
];

// ============================================
// Forms and fields
// ============================================

/// What a field can be used for in statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum FieldCapability {
    /// A rating field with its configuration
    Rating { config: RatingFieldConfig },
    /// A field whose values can partition statistics
    Groupable,
    /// Anything else
    Neither,
}

/// A field as described by the host form registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub handle: String,
    pub label: String,
    /// Host field type ("rating", "dropdown", ...)
    pub kind: String,
    pub capability: FieldCapability,
}

impl FieldDescriptor {
    pub fn rating(
        handle: impl Into<String>,
        label: impl Into<String>,
        config: RatingFieldConfig,
    ) -> Self {
        Self {
            handle: handle.into(),
            label: label.into(),
            kind: RATING_KIND.to_string(),
            capability: FieldCapability::Rating { config },
        }
    }

    /// A non-rating field; capability is derived from `kind`.
    pub fn plain(handle: impl Into<String>, label: impl Into<String>, kind: &str) -> Self {
        let capability = if GROUPABLE_KINDS.contains(&kind) {
            FieldCapability::Groupable
        } else {
            FieldCapability::Neither
        };
        Self {
            handle: handle.into(),
            label: label.into(),
            kind: kind.to_string(),
            capability,
        }
    }

    pub fn rating_config(&self) -> Option<&RatingFieldConfig> {
        match &self.capability {
            FieldCapability::Rating { config } => Some(config),
            _ => None,
        }
    }

    pub fn is_groupable(&self) -> bool {
        matches!(self.capability, FieldCapability::Groupable)
    }
}

/// A rating field resolved from a form
#[derive(Debug, Clone, PartialEq)]
pub struct RatingField {
    pub handle: String,
    pub label: String,
    pub config: RatingFieldConfig,
}

/// A grouping field resolved from a form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupableField {
    pub handle: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A host form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: i64,
    pub handle: String,
    pub title: String,
    pub fields: Vec<FieldDescriptor>,
}

impl Form {
    pub fn field(&self, handle: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.handle == handle)
    }

    /// Rating fields in form order
    pub fn rating_fields(&self) -> Vec<RatingField> {
        self.fields
            .iter()
            .filter_map(|f| {
                f.rating_config().map(|config| RatingField {
                    handle: f.handle.clone(),
                    label: f.label.clone(),
                    config: config.clone(),
                })
            })
            .collect()
    }

    pub fn rating_field(&self, handle: &str) -> Option<RatingField> {
        self.rating_fields().into_iter().find(|f| f.handle == handle)
    }

    /// Fields usable for grouping, in form order. Rating fields never qualify.
    pub fn groupable_fields(&self) -> Vec<GroupableField> {
        self.fields
            .iter()
            .filter(|f| f.is_groupable())
            .map(|f| GroupableField {
                handle: f.handle.clone(),
                label: f.label.clone(),
                kind: f.kind.clone(),
            })
            .collect()
    }
}

// ============================================
// Form definitions (import format)
// ============================================

/// A field as written in a form definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub handle: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: RatingFieldSettings,
}

impl FieldDefinition {
    /// Resolve into a descriptor; rating settings are validated here.
    pub fn into_descriptor(self, defaults: &FieldsConfig) -> Result<FieldDescriptor> {
        if self.kind == RATING_KIND {
            let config = self.settings.resolve(defaults).map_err(|e| match e {
                Error::FieldConfig(msg) => {
                    Error::FieldConfig(format!("field '{}': {}", self.handle, msg))
                }
                other => other,
            })?;
            Ok(FieldDescriptor::rating(self.handle, self.label, config))
        } else {
            Ok(FieldDescriptor::plain(self.handle, self.label, &self.kind))
        }
    }
}

/// A form as written in a form definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDefinition {
    #[serde(default)]
    pub id: Option<i64>,
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

// ============================================
// Submissions
// ============================================

/// A stored field value. Null values are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    /// Related element (entry, category)
    Element { title: String },
}

impl FieldValue {
    /// Convert a raw JSON value; `null` yields `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<FieldValue> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(FieldValue::Text(if *b { "1" } else { "" }.to_string())),
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Array(items) => Some(FieldValue::List(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.as_f64().map_or_else(|| n.to_string(), format_number)),
                        other => Some(other.to_string()),
                    })
                    .collect(),
            )),
            Value::Object(map) => match map.get("title") {
                Some(Value::String(title)) => Some(FieldValue::Element {
                    title: title.clone(),
                }),
                _ => Some(FieldValue::Text(value.to_string())),
            },
        }
    }

    /// Numeric rating carried by this value, if any.
    pub fn rating_value(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// String form used for grouping; `None` when empty.
    pub fn group_text(&self) -> Option<String> {
        let text = match self {
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join(", "),
            FieldValue::Element { title } => title.clone(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Plain text for exports
    pub fn display(&self) -> String {
        self.group_text().unwrap_or_default()
    }
}

/// A completed form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub form_id: i64,
    pub created_at: DateTime<Utc>,
    pub values: BTreeMap<String, FieldValue>,
}

impl Submission {
    pub fn value(&self, handle: &str) -> Option<&FieldValue> {
        self.values.get(handle)
    }

    pub fn rating_value(&self, handle: &str) -> Option<f64> {
        self.value(handle).and_then(FieldValue::rating_value)
    }

    /// Group label for `handle`, or `(Not Set)` when missing or empty.
    pub fn group_key(&self, handle: &str) -> String {
        self.value(handle)
            .and_then(FieldValue::group_text)
            .unwrap_or_else(|| NOT_SET_LABEL.to_string())
    }
}

// ============================================
// Date ranges
// ============================================

/// Observation window token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    Last90Days,
    #[default]
    All,
}

impl DateRange {
    /// Ranges warmed by cache regeneration
    pub const REGENERATED: [DateRange; 4] = [
        DateRange::Last7Days,
        DateRange::Last30Days,
        DateRange::Last90Days,
        DateRange::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRange::Today => "today",
            DateRange::Yesterday => "yesterday",
            DateRange::Last7Days => "last7days",
            DateRange::Last30Days => "last30days",
            DateRange::Last90Days => "last90days",
            DateRange::All => "all",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            DateRange::Today => "Today",
            DateRange::Yesterday => "Yesterday",
            DateRange::Last7Days => "Last 7 days",
            DateRange::Last30Days => "Last 30 days",
            DateRange::Last90Days => "Last 90 days",
            DateRange::All => "All time",
        }
    }

    /// Parse a request parameter; unknown tokens mean `all`.
    pub fn parse_lenient(s: &str) -> DateRange {
        s.parse().unwrap_or(DateRange::All)
    }

    fn days_back(&self) -> Option<i64> {
        match self {
            DateRange::Today => Some(0),
            DateRange::Yesterday => Some(1),
            DateRange::Last7Days => Some(7),
            DateRange::Last30Days => Some(30),
            DateRange::Last90Days => Some(90),
            DateRange::All => None,
        }
    }

    /// Inclusive lower bound: midnight `N` days before `now`, in `now`'s zone.
    ///
    /// There is no upper bound, so `yesterday` also includes today.
    pub fn start<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let days = self.days_back()?;
        let day = now.date_naive() - Duration::days(days);
        let midnight = day.and_hms_opt(0, 0, 0)?;
        let local = now.timezone().from_local_datetime(&midnight);
        Some(
            local
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
        )
    }

    /// strftime pattern for trend buckets
    pub fn trend_format(&self) -> &'static str {
        match self {
            DateRange::Today | DateRange::Yesterday => "%Y-%m-%d %H:00",
            DateRange::Last7Days | DateRange::Last30Days | DateRange::Last90Days => "%Y-%m-%d",
            DateRange::All => "%G-%V",
        }
    }

    /// Token used in export filenames
    pub fn export_label(&self) -> &'static str {
        match self {
            DateRange::All => "alltime",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "today" => Ok(DateRange::Today),
            "yesterday" => Ok(DateRange::Yesterday),
            "last7days" => Ok(DateRange::Last7Days),
            "last30days" => Ok(DateRange::Last30Days),
            "last90days" => Ok(DateRange::Last90Days),
            "all" => Ok(DateRange::All),
            _ => Err(format!("unknown date range: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RatingType;
    use chrono::{FixedOffset, NaiveDate};
    use serde_json::json;

    fn sample_form() -> Form {
        Form {
            id: 1,
            handle: "feedback".to_string(),
            title: "Feedback".to_string(),
            fields: vec![
                FieldDescriptor::rating("score", "Score", RatingFieldConfig::new(RatingType::Star, 1, 5)),
                FieldDescriptor::plain("store", "Store", "dropdown"),
                FieldDescriptor::plain("comment", "Comment", "multi_line_text"),
                FieldDescriptor::plain("ref", "Reference", "hidden"),
            ],
        }
    }

    #[test]
    fn test_form_field_capabilities() {
        let form = sample_form();
        let ratings = form.rating_fields();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].handle, "score");

        let groupable: Vec<_> = form.groupable_fields().into_iter().map(|f| f.handle).collect();
        assert_eq!(groupable, vec!["store", "ref"]);
        assert!(form.rating_field("store").is_none());
    }

    #[test]
    fn test_field_value_from_json() {
        assert_eq!(FieldValue::from_json(&json!(null)), None);
        assert_eq!(FieldValue::from_json(&json!(4.5)), Some(FieldValue::Number(4.5)));
        assert_eq!(
            FieldValue::from_json(&json!(["a", 2])),
            Some(FieldValue::List(vec!["a".to_string(), "2".to_string()]))
        );
        assert_eq!(
            FieldValue::from_json(&json!({"id": 3, "title": "North"})),
            Some(FieldValue::Element { title: "North".to_string() })
        );
    }

    #[test]
    fn test_rating_value_extraction() {
        assert_eq!(FieldValue::Number(3.0).rating_value(), Some(3.0));
        assert_eq!(FieldValue::Text(" 4.5 ".to_string()).rating_value(), Some(4.5));
        assert_eq!(FieldValue::Text(String::new()).rating_value(), None);
        assert_eq!(FieldValue::Text("great".to_string()).rating_value(), None);
        assert_eq!(FieldValue::List(vec!["5".to_string()]).rating_value(), None);
    }

    #[test]
    fn test_group_key() {
        let mut values = BTreeMap::new();
        values.insert("store".to_string(), FieldValue::Text("North".to_string()));
        values.insert("empty".to_string(), FieldValue::Text(String::new()));
        values.insert(
            "tags".to_string(),
            FieldValue::List(vec!["a".to_string(), "b".to_string()]),
        );
        values.insert("num".to_string(), FieldValue::Number(2.0));
        let submission = Submission {
            id: 1,
            form_id: 1,
            created_at: Utc::now(),
            values,
        };

        assert_eq!(submission.group_key("store"), "North");
        assert_eq!(submission.group_key("empty"), NOT_SET_LABEL);
        assert_eq!(submission.group_key("missing"), NOT_SET_LABEL);
        assert_eq!(submission.group_key("tags"), "a, b");
        assert_eq!(submission.group_key("num"), "2");
    }

    #[test]
    fn test_date_range_parse() {
        assert_eq!("last30days".parse::<DateRange>().unwrap(), DateRange::Last30Days);
        assert!("lastyear".parse::<DateRange>().is_err());
        assert_eq!(DateRange::parse_lenient("lastyear"), DateRange::All);
        assert_eq!(DateRange::All.export_label(), "alltime");
        assert_eq!(DateRange::Today.export_label(), "today");
    }

    #[test]
    fn test_date_range_start() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();

        assert_eq!(DateRange::All.start(&now), None);

        // Local midnight, reported in UTC
        let today = DateRange::Today.start(&now).unwrap();
        assert_eq!(
            today.naive_utc(),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap().and_hms_opt(22, 0, 0).unwrap()
        );

        let week = DateRange::Last7Days.start(&now).unwrap();
        assert_eq!(
            week.with_timezone(&tz).date_naive(),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
    }

    #[test]
    fn test_field_definition_into_descriptor() {
        let def: FieldDefinition = serde_json::from_value(json!({
            "handle": "nps",
            "label": "Recommend?",
            "type": "rating",
            "settings": {"ratingType": "nps", "minValue": 1, "maxValue": 5}
        }))
        .unwrap();
        let descriptor = def.into_descriptor(&FieldsConfig::default()).unwrap();
        let config = descriptor.rating_config().unwrap();
        assert_eq!((config.min_value, config.max_value), (0, 10));

        let bad: FieldDefinition = serde_json::from_value(json!({
            "handle": "bad",
            "label": "Bad",
            "type": "rating",
            "settings": {"minValue": 5, "maxValue": 3}
        }))
        .unwrap();
        assert!(matches!(
            bad.into_descriptor(&FieldsConfig::default()),
            Err(Error::FieldConfig(_))
        ));
    }
}
