//! Aggregate result payloads
//!
//! These are the values cached per (form, field, date range, grouping) and
//! returned by the data endpoints. Field names are camelCase on the wire.

use crate::field::RatingType;
use serde::{Deserialize, Serialize};

/// Statistics for one rating field, plain or grouped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldStatistics {
    Grouped(GroupedStatistics),
    Summary(FieldSummary),
}

impl FieldStatistics {
    pub fn field_type(&self) -> RatingType {
        match self {
            FieldStatistics::Grouped(g) => g.field_type,
            FieldStatistics::Summary(s) => s.field_type,
        }
    }

    pub fn field_handle(&self) -> &str {
        match self {
            FieldStatistics::Grouped(g) => &g.field_handle,
            FieldStatistics::Summary(s) => &s.field_handle,
        }
    }

    pub fn as_summary(&self) -> Option<&FieldSummary> {
        match self {
            FieldStatistics::Summary(s) => Some(s),
            FieldStatistics::Grouped(_) => None,
        }
    }

    pub fn as_grouped(&self) -> Option<&GroupedStatistics> {
        match self {
            FieldStatistics::Grouped(g) => Some(g),
            FieldStatistics::Summary(_) => None,
        }
    }

    /// Distribution buckets, if this is an ungrouped star/emoji summary
    pub fn distribution(&self) -> Option<&[DistributionBucket]> {
        match self.as_summary()?.metrics {
            RatingMetrics::Scale(ref scale) => Some(scale.distribution.as_slice()),
            RatingMetrics::Nps(_) => None,
        }
    }
}

/// Ungrouped statistics for a rating field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSummary {
    pub field_type: RatingType,
    pub field_label: String,
    pub field_handle: String,
    pub total_responses: usize,
    pub min_value: i32,
    pub max_value: i32,
    #[serde(flatten)]
    pub metrics: RatingMetrics,
}

/// Type-specific statistics. NPS is listed first so payloads decode to it
/// whenever `npsScore` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatingMetrics {
    Nps(NpsMetrics),
    Scale(ScaleMetrics),
}

/// Star and emoji statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleMetrics {
    pub average: f64,
    pub distribution: Vec<DistributionBucket>,
    pub median: f64,
    pub mode: Option<f64>,
}

/// One option bucket of a distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionBucket {
    pub value: f64,
    pub count: usize,
    pub percentage: f64,
}

/// Net Promoter Score breakdown
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsMetrics {
    pub nps_score: f64,
    pub promoters: usize,
    pub promoters_percentage: f64,
    pub passives: usize,
    pub passives_percentage: f64,
    pub detractors: usize,
    pub detractors_percentage: f64,
    pub average: f64,
}

/// Statistics partitioned by a grouping field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedStatistics {
    pub field_type: RatingType,
    pub field_label: String,
    pub field_handle: String,
    pub group_by_handle: String,
    pub group_by_label: String,
    pub groups: Vec<GroupStats>,
    pub total_groups: usize,
}

impl GroupedStatistics {
    pub fn group(&self, label: &str) -> Option<&GroupStats> {
        self.groups.iter().find(|g| g.label == label)
    }
}

/// One group of a grouped result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub label: String,
    pub count: usize,
    #[serde(flatten)]
    pub metrics: GroupMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupMetrics {
    Nps(NpsMetrics),
    Scale(GroupScale),
}

/// Star and emoji statistics for a group
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupScale {
    pub average: f64,
    pub median: f64,
}

/// Time series for trend charts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendSeries {
    pub labels: Vec<String>,
    pub averages: Vec<f64>,
    pub counts: Vec<usize>,
}

/// Distribution arrays for bar charts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DistributionSeries {
    pub labels: Vec<f64>,
    pub values: Vec<usize>,
    pub percentages: Vec<f64>,
}

impl DistributionSeries {
    pub fn from_buckets(buckets: &[DistributionBucket]) -> Self {
        Self {
            labels: buckets.iter().map(|b| b.value).collect(),
            values: buckets.iter().map(|b| b.count).collect(),
            percentages: buckets.iter().map(|b| b.percentage).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(metrics: RatingMetrics, field_type: RatingType) -> FieldStatistics {
        FieldStatistics::Summary(FieldSummary {
            field_type,
            field_label: "Score".to_string(),
            field_handle: "score".to_string(),
            total_responses: 0,
            min_value: 1,
            max_value: 5,
            metrics,
        })
    }

    #[test]
    fn test_empty_scale_summary_shape() {
        let stats = summary(RatingMetrics::Scale(ScaleMetrics::default()), RatingType::Star);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(
            value,
            json!({
                "fieldType": "star",
                "fieldLabel": "Score",
                "fieldHandle": "score",
                "totalResponses": 0,
                "minValue": 1,
                "maxValue": 5,
                "average": 0.0,
                "distribution": [],
                "median": 0.0,
                "mode": null
            })
        );
    }

    #[test]
    fn test_payloads_decode_to_matching_variant() {
        let nps = summary(RatingMetrics::Nps(NpsMetrics::default()), RatingType::Nps);
        let text = serde_json::to_string(&nps).unwrap();
        let back: FieldStatistics = serde_json::from_str(&text).unwrap();
        assert_eq!(back, nps);
        assert!(back.distribution().is_none());

        let grouped = FieldStatistics::Grouped(GroupedStatistics {
            field_type: RatingType::Star,
            field_label: "Score".to_string(),
            field_handle: "score".to_string(),
            group_by_handle: "store".to_string(),
            group_by_label: "Store".to_string(),
            groups: vec![GroupStats {
                label: "North".to_string(),
                count: 2,
                metrics: GroupMetrics::Scale(GroupScale {
                    average: 4.5,
                    median: 4.5,
                }),
            }],
            total_groups: 1,
        });
        let text = serde_json::to_string(&grouped).unwrap();
        let back: FieldStatistics = serde_json::from_str(&text).unwrap();
        assert_eq!(back, grouped);
        assert_eq!(back.as_grouped().unwrap().group("North").unwrap().count, 2);
    }
}
