//! Aggregation engine
//!
//! Pure functions over rating observations. None of them fail: empty input
//! yields zero-valued results.

use super::result::{
    DistributionBucket, FieldStatistics, FieldSummary, GroupMetrics, GroupScale, GroupStats,
    NpsMetrics, RatingMetrics, ScaleMetrics, TrendSeries,
};
use crate::field::RatingFieldConfig;
use crate::types::{DateRange, RatingField};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Maximum number of points in a trend series
pub const MAX_TREND_POINTS: usize = 50;

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_to(count as f64 / total as f64 * 100.0, 1)
    }
}

/// Arithmetic mean to 2 decimals, `0` when empty.
pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    round_to(values.iter().sum::<f64>() / values.len() as f64, 2)
}

/// Median, `0` when empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Most frequent value; the lowest wins among ties.
///
/// Returns `None` for empty input or when no value repeats.
pub fn mode(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let value = sorted[i];
        let run = sorted[i..].iter().take_while(|v| **v == value).count();
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((value, run));
        }
        i += run.max(1);
    }

    best.filter(|(_, count)| *count > 1).map(|(value, _)| value)
}

/// Count and percentage per option of the field's ladder.
pub fn distribution(values: &[f64], config: &RatingFieldConfig) -> Vec<DistributionBucket> {
    let total = values.len();
    let half_step = config.is_half_step();

    config
        .options()
        .into_iter()
        .map(|option| {
            let count = values
                .iter()
                .filter(|v| {
                    if half_step {
                        (**v - option.value).abs() < 0.01
                    } else {
                        v.floor() == option.value
                    }
                })
                .count();
            DistributionBucket {
                value: option.value,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect()
}

/// Promoters (>= 9), passives (7..=8) and detractors (<= 6).
pub fn nps_stats(values: &[f64]) -> NpsMetrics {
    let total = values.len();
    if total == 0 {
        return NpsMetrics::default();
    }

    let promoters = values.iter().filter(|v| **v >= 9.0).count();
    let passives = values.iter().filter(|v| **v >= 7.0 && **v <= 8.0).count();
    let detractors = values.iter().filter(|v| **v <= 6.0).count();

    NpsMetrics {
        nps_score: round_to(
            (promoters as f64 - detractors as f64) / total as f64 * 100.0,
            1,
        ),
        promoters,
        promoters_percentage: percentage(promoters, total),
        passives,
        passives_percentage: percentage(passives, total),
        detractors,
        detractors_percentage: percentage(detractors, total),
        average: average(values),
    }
}

/// Star/emoji statistics. Empty input has an empty distribution.
pub fn scale_metrics(values: &[f64], config: &RatingFieldConfig) -> ScaleMetrics {
    if values.is_empty() {
        return ScaleMetrics::default();
    }
    ScaleMetrics {
        average: average(values),
        distribution: distribution(values, config),
        median: median(values),
        mode: mode(values),
    }
}

/// Ungrouped statistics for `field`.
pub fn summarize(field: &RatingField, values: &[f64]) -> FieldStatistics {
    let metrics = if field.config.rating_type.is_nps() {
        RatingMetrics::Nps(nps_stats(values))
    } else {
        RatingMetrics::Scale(scale_metrics(values, &field.config))
    };

    FieldStatistics::Summary(FieldSummary {
        field_type: field.config.rating_type,
        field_label: field.label.clone(),
        field_handle: field.handle.clone(),
        total_responses: values.len(),
        min_value: field.config.min_value,
        max_value: field.config.max_value,
        metrics,
    })
}

/// Per-group statistics from `(group label, value)` observations.
///
/// Groups are ordered by descending count, then by label.
pub fn grouped_stats(observations: &[(String, f64)], config: &RatingFieldConfig) -> Vec<GroupStats> {
    let mut by_group: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (label, value) in observations {
        by_group.entry(label.as_str()).or_default().push(*value);
    }

    let mut groups: Vec<GroupStats> = by_group
        .into_iter()
        .map(|(label, values)| {
            let metrics = if config.rating_type.is_nps() {
                GroupMetrics::Nps(nps_stats(&values))
            } else {
                GroupMetrics::Scale(GroupScale {
                    average: average(&values),
                    median: median(&values),
                })
            };
            GroupStats {
                label: label.to_string(),
                count: values.len(),
                metrics,
            }
        })
        .collect();

    // Stable: equal counts keep label order
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

/// Time-bucketed averages in `tz`, sorted by bucket label and capped at
/// [`MAX_TREND_POINTS`] by keeping every Nth bucket.
pub fn trend<Tz>(observations: &[(DateTime<Utc>, f64)], range: DateRange, tz: &Tz) -> TrendSeries
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let format = range.trend_format();
    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (created_at, value) in observations {
        let label = created_at.with_timezone(tz).format(format).to_string();
        buckets.entry(label).or_default().push(*value);
    }

    let total = buckets.len();
    let stride = if total > MAX_TREND_POINTS {
        total.div_ceil(MAX_TREND_POINTS)
    } else {
        1
    };

    let mut series = TrendSeries::default();
    for (_, (label, values)) in buckets
        .into_iter()
        .enumerate()
        .filter(|(index, _)| index % stride == 0)
    {
        series.averages.push(average(&values));
        series.counts.push(values.len());
        series.labels.push(label);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::RatingType;
    use chrono::Duration;

    fn star(min: i32, max: i32) -> RatingFieldConfig {
        RatingFieldConfig::new(RatingType::Star, min, max)
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[5.0, 4.0, 5.0, 3.0, 5.0]), 4.4);
        assert_eq!(average(&[1.0, 2.0, 2.0]), 1.67);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_mode() {
        assert_eq!(mode(&[1.0, 1.0, 2.0, 3.0]), Some(1.0));
        assert_eq!(mode(&[1.0, 2.0, 3.0]), None);
        assert_eq!(mode(&[]), None);
        // Ties resolve to the lowest value
        assert_eq!(mode(&[4.0, 4.0, 2.0, 2.0, 5.0]), Some(2.0));
    }

    #[test]
    fn test_distribution() {
        let buckets = distribution(&[5.0, 4.0, 5.0, 3.0, 5.0], &star(1, 5));
        let counts: Vec<usize> = buckets.iter().map(|b| b.count).collect();
        let percentages: Vec<f64> = buckets.iter().map(|b| b.percentage).collect();
        assert_eq!(counts, vec![0, 0, 1, 1, 3]);
        assert_eq!(percentages, vec![0.0, 0.0, 20.0, 20.0, 60.0]);
    }

    #[test]
    fn test_distribution_floor_and_half_step() {
        // Whole-step ladders floor stray halves into the lower bucket
        let buckets = distribution(&[3.5, 3.0], &star(1, 5));
        assert_eq!(buckets[2].count, 2);

        let half = star(1, 5).with_half_ratings(true);
        let buckets = distribution(&[3.5, 3.0, 3.5], &half);
        assert_eq!(buckets.len(), 9);
        assert_eq!(buckets[4].value, 3.0);
        assert_eq!(buckets[4].count, 1);
        assert_eq!(buckets[5].count, 2);
        assert_eq!(buckets[5].percentage, 66.7);
    }

    #[test]
    fn test_distribution_percentages_sum() {
        let values = [1.0, 2.0, 2.0, 3.0, 4.0, 4.0, 5.0];
        let sum: f64 = distribution(&values, &star(1, 5))
            .iter()
            .map(|b| b.percentage)
            .sum();
        assert!((sum - 100.0).abs() <= 0.1 + 1e-9);

        let empty: f64 = distribution(&[], &star(1, 5))
            .iter()
            .map(|b| b.percentage)
            .sum();
        assert_eq!(empty, 0.0);
    }

    #[test]
    fn test_nps_stats() {
        let stats = nps_stats(&[9.0, 9.0, 6.0, 6.0, 7.0]);
        assert_eq!(stats.promoters, 2);
        assert_eq!(stats.passives, 1);
        assert_eq!(stats.detractors, 2);
        assert_eq!(stats.nps_score, 0.0);
        assert_eq!(stats.promoters_percentage, 40.0);
        assert_eq!(stats.average, 7.4);

        assert_eq!(nps_stats(&[]), NpsMetrics::default());
    }

    #[test]
    fn test_summarize_empty() {
        let field = RatingField {
            handle: "score".to_string(),
            label: "Score".to_string(),
            config: star(1, 5),
        };
        let stats = summarize(&field, &[]);
        let summary = stats.as_summary().unwrap();
        assert_eq!(summary.total_responses, 0);
        assert_eq!(summary.metrics, RatingMetrics::Scale(ScaleMetrics::default()));
    }

    #[test]
    fn test_grouped_stats_ordering() {
        let obs = vec![
            ("South".to_string(), 4.0),
            ("North".to_string(), 5.0),
            ("North".to_string(), 3.0),
            ("(Not Set)".to_string(), 2.0),
            ("East".to_string(), 1.0),
        ];
        let groups = grouped_stats(&obs, &star(1, 5));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["North", "(Not Set)", "East", "South"]);
        assert_eq!(
            groups[0].metrics,
            GroupMetrics::Scale(GroupScale {
                average: 4.0,
                median: 4.0
            })
        );

        let nps = RatingFieldConfig::new(RatingType::Nps, 0, 10);
        let groups = grouped_stats(&[("A".to_string(), 10.0)], &nps);
        match &groups[0].metrics {
            GroupMetrics::Nps(m) => assert_eq!(m.nps_score, 100.0),
            other => panic!("unexpected metrics: {other:?}"),
        }
    }

    #[test]
    fn test_trend_daily_buckets() {
        let day = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let obs = vec![
            (day + Duration::days(1), 4.0),
            (day, 5.0),
            (day + Duration::hours(3), 3.0),
        ];
        let series = trend(&obs, DateRange::Last7Days, &Utc);
        assert_eq!(series.labels, vec!["2024-05-01", "2024-05-02"]);
        assert_eq!(series.averages, vec![4.0, 4.0]);
        assert_eq!(series.counts, vec![2, 1]);

        let hourly = trend(&obs, DateRange::Today, &Utc);
        assert_eq!(hourly.labels[0], "2024-05-01 10:00");
    }

    #[test]
    fn test_trend_downsampling() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let obs: Vec<_> = (0..120)
            .map(|i| (start + Duration::days(i), 3.0))
            .collect();
        let series = trend(&obs, DateRange::Last90Days, &Utc);

        // ceil(120 / 50) = 3: keep indices 0, 3, 6, ...
        assert_eq!(series.labels.len(), 40);
        assert_eq!(series.labels[0], "2024-01-01");
        assert_eq!(series.labels[1], "2024-01-04");
    }

    #[test]
    fn test_trend_weeks_use_iso_week_year() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        // Tuesday of ISO week 1 of 2025
        let dec = Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap();

        let series = trend(&[(jan, 1.0), (jun, 3.0), (dec, 5.0)], DateRange::All, &Utc);
        assert_eq!(series.labels, vec!["2024-01", "2024-22", "2025-01"]);
        assert_eq!(series.averages, vec![1.0, 3.0, 5.0]);
        assert_eq!(series.counts, vec![1, 1, 1]);
    }

    #[test]
    fn test_trend_weekly_label() {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let series = trend(&[(at, 4.0)], DateRange::All, &Utc);
        assert_eq!(series.labels, vec!["2024-02"]);
    }
}
