//! Rating field configuration
//!
//! A rating field is one of three types (star, emoji, NPS) over an integer
//! range. The configuration produces the option ladder used both to validate
//! submitted values and to bucket distributions.

use crate::config::FieldsConfig;
use crate::error::{Error, Result};
use crate::format::format_number;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Rating type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingType {
    Star,
    Emoji,
    Nps,
}

impl RatingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingType::Star => "star",
            RatingType::Emoji => "emoji",
            RatingType::Nps => "nps",
        }
    }

    /// Whether statistics use the promoter/passive/detractor breakdown
    pub fn is_nps(&self) -> bool {
        matches!(self, RatingType::Nps)
    }
}

impl std::fmt::Display for RatingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "star" => Ok(RatingType::Star),
            "emoji" => Ok(RatingType::Emoji),
            "nps" => Ok(RatingType::Nps),
            _ => Err(Error::FieldConfig(format!("unknown rating type '{}'", s))),
        }
    }
}

pub const NPS_MIN: i32 = 0;
pub const NPS_MAX: i32 = 10;

const EMOJIS_5: [&str; 5] = ["😢", "😕", "😐", "😊", "😍"];
const EMOJIS_8: [&str; 8] = ["😢", "😕", "😐", "😊", "😄", "😁", "🤩", "😍"];
const EMOJIS_11: [&str; 11] = [
    "😭", "😢", "😕", "😐", "🙂", "😊", "😄", "😁", "🤩", "😍", "🥳",
];
const EMOJI_FALLBACK: &str = "😐";

/// One entry of the option ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingOption {
    pub value: f64,
    pub label: String,
}

/// Configuration of a single rating field.
///
/// NPS fields are always normalized to the 0..10 range, whatever range was
/// supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RatingFieldSettings", into = "RatingFieldSettings")]
pub struct RatingFieldConfig {
    pub rating_type: RatingType,
    pub min_value: i32,
    pub max_value: i32,
    pub allow_half_ratings: bool,
    pub custom_labels: BTreeMap<i32, String>,
}

impl RatingFieldConfig {
    pub fn new(rating_type: RatingType, min_value: i32, max_value: i32) -> Self {
        let (min_value, max_value) = if rating_type.is_nps() {
            (NPS_MIN, NPS_MAX)
        } else {
            (min_value, max_value)
        };
        Self {
            rating_type,
            min_value,
            max_value,
            allow_half_ratings: false,
            custom_labels: BTreeMap::new(),
        }
    }

    pub fn with_half_ratings(mut self, allow: bool) -> Self {
        self.allow_half_ratings = allow;
        self
    }

    pub fn with_label(mut self, value: i32, label: impl Into<String>) -> Self {
        self.custom_labels.insert(value, label.into());
        self
    }

    /// Check the range against the permitted domain.
    pub fn validate(&self) -> Result<()> {
        if self.min_value >= self.max_value {
            return Err(Error::FieldConfig(format!(
                "minimum value {} must be less than maximum value {}",
                self.min_value, self.max_value
            )));
        }
        if !self.rating_type.is_nps() {
            if !(0..=1).contains(&self.min_value) {
                return Err(Error::FieldConfig(format!(
                    "minimum value must be 0 or 1, got {}",
                    self.min_value
                )));
            }
            if !(3..=10).contains(&self.max_value) {
                return Err(Error::FieldConfig(format!(
                    "maximum value must be between 3 and 10, got {}",
                    self.max_value
                )));
            }
        }
        Ok(())
    }

    /// Half steps only apply to star ratings.
    pub fn step(&self) -> f64 {
        if self.is_half_step() {
            0.5
        } else {
            1.0
        }
    }

    pub fn is_half_step(&self) -> bool {
        self.allow_half_ratings && self.rating_type == RatingType::Star
    }

    /// Ordered option ladder from `min_value` to `max_value`.
    pub fn options(&self) -> Vec<RatingOption> {
        let per_unit = if self.is_half_step() { 2 } else { 1 };
        let steps = (self.max_value - self.min_value).max(0) * per_unit;

        (0..=steps)
            .map(|i| {
                let value = self.min_value as f64 + i as f64 / per_unit as f64;
                RatingOption {
                    value,
                    label: self.label_for(value),
                }
            })
            .collect()
    }

    fn label_for(&self, value: f64) -> String {
        if !self.rating_type.is_nps() && value.fract() == 0.0 {
            if let Some(label) = self.custom_labels.get(&(value as i32)) {
                return label.clone();
            }
        }
        format_number(value)
    }

    /// Render a stored value for people ("★★★☆☆ (3/5)", "😊 (4/5)", "9/10").
    pub fn display_value(&self, value: f64) -> String {
        let max = self.max_value;
        match self.rating_type {
            RatingType::Star => {
                let full = value.floor().max(0.0) as usize;
                let has_half = value - value.floor() >= 0.5;
                let empty = (max as f64 - value.ceil()).max(0.0) as usize;

                let mut stars = "★".repeat(full);
                if has_half {
                    stars.push('½');
                }
                stars.push_str(&"☆".repeat(empty));
                format!("{} ({}/{})", stars, format_number(value), max)
            }
            RatingType::Emoji => {
                let count = self.max_value - self.min_value + 1;
                let palette: &[&str] = if count <= 5 {
                    &EMOJIS_5
                } else if count <= 8 {
                    &EMOJIS_8
                } else {
                    &EMOJIS_11
                };
                let span = (self.max_value - self.min_value).max(1) as f64;
                let index = ((value - self.min_value as f64) / span
                    * (palette.len() - 1) as f64)
                    .round();
                let emoji = if index >= 0.0 {
                    palette.get(index as usize).copied()
                } else {
                    None
                };
                format!(
                    "{} ({}/{})",
                    emoji.unwrap_or(EMOJI_FALLBACK),
                    format_number(value),
                    max
                )
            }
            RatingType::Nps => format!("{}/{}", format_number(value), max),
        }
    }
}

// ============================================
// Settings (persisted form)
// ============================================

/// Persisted field settings, as stored by the host.
///
/// Every setting is optional; missing ones come from [`FieldsConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingFieldSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_half_ratings: Option<bool>,
    #[serde(default)]
    pub custom_labels: CustomLabels,
}

/// Custom labels in either of the two stored shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomLabels {
    /// `[{"value": 1, "label": "Poor"}, ...]`
    Table(Vec<LabelRow>),
    /// `{"1": "Poor", ...}`
    Map(BTreeMap<String, String>),
}

impl Default for CustomLabels {
    fn default() -> Self {
        CustomLabels::Map(BTreeMap::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRow {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub label: serde_json::Value,
}

impl CustomLabels {
    /// Normalize to a value -> label map, dropping incomplete rows.
    pub fn normalize(&self) -> BTreeMap<i32, String> {
        match self {
            CustomLabels::Table(rows) => rows
                .iter()
                .filter_map(|row| {
                    let value = json_to_int(&row.value)?;
                    let label = match &row.label {
                        serde_json::Value::String(s) if !s.is_empty() => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((value, label))
                })
                .collect(),
            CustomLabels::Map(map) => map
                .iter()
                .filter_map(|(k, v)| {
                    let value = k.trim().parse::<f64>().ok()?;
                    Some((value.trunc() as i32, v.clone()))
                })
                .collect(),
        }
    }
}

fn json_to_int(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f.trunc() as i32),
        serde_json::Value::String(s) if !s.trim().is_empty() => {
            s.trim().parse::<f64>().ok().map(|f| f.trunc() as i32)
        }
        _ => None,
    }
}

impl RatingFieldSettings {
    /// Resolve into a validated configuration, filling gaps from `defaults`.
    pub fn resolve(&self, defaults: &FieldsConfig) -> Result<RatingFieldConfig> {
        let rating_type = match &self.rating_type {
            Some(s) => s.parse()?,
            None => defaults.default_rating_type,
        };
        let min = self.min_value.unwrap_or(defaults.default_min_rating);
        let max = self.max_value.unwrap_or(defaults.default_max_rating);
        let half = self
            .allow_half_ratings
            .unwrap_or(defaults.default_allow_half_ratings);

        let mut config = RatingFieldConfig::new(rating_type, min, max).with_half_ratings(half);
        config.custom_labels = self.custom_labels.normalize();
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<RatingFieldSettings> for RatingFieldConfig {
    type Error = Error;

    fn try_from(settings: RatingFieldSettings) -> Result<Self> {
        settings.resolve(&FieldsConfig::default())
    }
}

impl From<RatingFieldConfig> for RatingFieldSettings {
    fn from(config: RatingFieldConfig) -> Self {
        RatingFieldSettings {
            rating_type: Some(config.rating_type.as_str().to_string()),
            min_value: Some(config.min_value),
            max_value: Some(config.max_value),
            allow_half_ratings: Some(config.allow_half_ratings),
            custom_labels: CustomLabels::Map(
                config
                    .custom_labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        }
    }
}
