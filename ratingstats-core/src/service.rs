//! Statistics service
//!
//! Resolves rating fields on a form, serves statistics from the cache and
//! computes them on a miss. All collaborators are passed in explicitly.

use crate::analytics::{
    self, DistributionSeries, FieldStatistics, GroupedStatistics, TrendSeries,
};
use crate::cache::{CacheInfo, CacheKey, StatisticsCache};
use crate::error::{Error, Result};
use crate::source::FormSource;
use crate::types::{DateRange, Form, GroupableField, RatingField, Submission};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;

/// A form that has at least one rating field
#[derive(Debug, Clone)]
pub struct FormOverview {
    pub form: Form,
    pub rating_field_count: usize,
    pub total_submissions: usize,
}

pub struct StatisticsService {
    source: Arc<dyn FormSource>,
    cache: Arc<StatisticsCache>,
}

impl StatisticsService {
    pub fn new(source: Arc<dyn FormSource>, cache: Arc<StatisticsCache>) -> Self {
        Self { source, cache }
    }

    pub fn builder() -> StatisticsServiceBuilder {
        StatisticsServiceBuilder::default()
    }

    pub fn source(&self) -> &Arc<dyn FormSource> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<StatisticsCache> {
        &self.cache
    }

    // ============================================
    // Forms and fields
    // ============================================

    pub fn form(&self, id: i64) -> Result<Form> {
        self.source.form(id)?.ok_or(Error::FormNotFound(id))
    }

    pub fn forms_with_rating_fields(&self) -> Result<Vec<FormOverview>> {
        let mut overviews = Vec::new();
        for form in self.source.forms()? {
            let rating_field_count = form.rating_fields().len();
            if rating_field_count == 0 {
                continue;
            }
            let total_submissions = self.source.count_submissions(form.id)?;
            overviews.push(FormOverview {
                form,
                rating_field_count,
                total_submissions,
            });
        }
        Ok(overviews)
    }

    pub fn rating_fields(&self, form: &Form) -> Vec<RatingField> {
        form.rating_fields()
    }

    pub fn groupable_fields(&self, form: &Form) -> Vec<GroupableField> {
        form.groupable_fields()
    }

    pub fn rating_field(&self, form: &Form, handle: &str) -> Option<RatingField> {
        form.rating_field(handle)
    }

    // ============================================
    // Statistics
    // ============================================

    /// Statistics for one field, served from the cache when present.
    ///
    /// A failed cache write is logged and the fresh result is still returned.
    pub fn field_statistics(
        &self,
        form: &Form,
        field: &RatingField,
        range: DateRange,
        group_by: Option<&str>,
    ) -> Result<FieldStatistics> {
        let key = CacheKey::new(form.id, &field.handle, range, group_by);

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(form_id = form.id, field = %field.handle, key = %key, "Cache hit");
            return Ok(cached);
        }

        let stats = match key.group_by.as_deref() {
            Some(group_by) => {
                FieldStatistics::Grouped(self.grouped_statistics(form, field, range, group_by)?)
            }
            None => self.compute_summary(form, field, range)?,
        };

        if let Err(e) = self.cache.put(&key, &stats) {
            tracing::warn!(
                form_id = form.id,
                field = %field.handle,
                error = %e,
                "Returning uncached statistics"
            );
        }

        Ok(stats)
    }

    fn compute_summary(
        &self,
        form: &Form,
        field: &RatingField,
        range: DateRange,
    ) -> Result<FieldStatistics> {
        let submissions = self.submissions(form, range)?;
        let values: Vec<f64> = submissions
            .iter()
            .filter_map(|s| s.rating_value(&field.handle))
            .collect();
        Ok(analytics::summarize(field, &values))
    }

    /// Grouped statistics, always computed
    pub fn grouped_statistics(
        &self,
        form: &Form,
        field: &RatingField,
        range: DateRange,
        group_by: &str,
    ) -> Result<GroupedStatistics> {
        let group_field = form
            .field(group_by)
            .ok_or_else(|| Error::GroupFieldNotFound(group_by.to_string()))?;

        let observations: Vec<(String, f64)> = self
            .submissions(form, range)?
            .iter()
            .filter_map(|s| {
                s.rating_value(&field.handle)
                    .map(|value| (s.group_key(group_by), value))
            })
            .collect();

        let groups = analytics::grouped_stats(&observations, &field.config);
        Ok(GroupedStatistics {
            field_type: field.config.rating_type,
            field_label: field.label.clone(),
            field_handle: field.handle.clone(),
            group_by_handle: group_by.to_string(),
            group_by_label: group_field.label.clone(),
            total_groups: groups.len(),
            groups,
        })
    }

    /// Trend series in local time. Not cached.
    pub fn trend_data(&self, form: &Form, field: &RatingField, range: DateRange) -> Result<TrendSeries> {
        let observations: Vec<(DateTime<Utc>, f64)> = self
            .submissions(form, range)?
            .iter()
            .filter_map(|s| s.rating_value(&field.handle).map(|v| (s.created_at, v)))
            .collect();
        Ok(analytics::trend(&observations, range, &Local))
    }

    /// Distribution arrays; empty for NPS fields.
    pub fn distribution_data(
        &self,
        form: &Form,
        field: &RatingField,
        range: DateRange,
    ) -> Result<DistributionSeries> {
        let stats = self.field_statistics(form, field, range, None)?;
        Ok(stats
            .distribution()
            .map(DistributionSeries::from_buckets)
            .unwrap_or_default())
    }

    pub fn total_submissions(&self, form: &Form, range: DateRange) -> Result<usize> {
        Ok(self.submissions(form, range)?.len())
    }

    /// Submissions in `range`, newest first
    pub fn submissions(&self, form: &Form, range: DateRange) -> Result<Vec<Submission>> {
        let since = range.start(&Local::now());
        self.source.submissions(form.id, since)
    }

    /// Submissions whose grouping value matches `group_value`
    pub fn group_submissions(
        &self,
        form: &Form,
        group_by: &str,
        group_value: &str,
        range: DateRange,
    ) -> Result<Vec<Submission>> {
        if form.field(group_by).is_none() {
            return Err(Error::GroupFieldNotFound(group_by.to_string()));
        }
        Ok(self
            .submissions(form, range)?
            .into_iter()
            .filter(|s| s.group_key(group_by) == group_value)
            .collect())
    }

    // ============================================
    // Cache management
    // ============================================

    pub fn clear_cache_for_form(&self, form_id: i64) -> bool {
        self.cache.clear_form(form_id)
    }

    pub fn clear_all_cache(&self) -> bool {
        self.cache.clear_all()
    }

    pub fn cache_count(&self) -> usize {
        self.cache.count()
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.cache.info()
    }
}

/// Builder for [`StatisticsService`]
#[derive(Default)]
pub struct StatisticsServiceBuilder {
    source: Option<Arc<dyn FormSource>>,
    cache: Option<Arc<StatisticsCache>>,
}

impl StatisticsServiceBuilder {
    pub fn source(mut self, source: Arc<dyn FormSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cache(mut self, cache: Arc<StatisticsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<StatisticsService> {
        let source = self.source.ok_or(Error::MissingCollaborator("form source"))?;
        let cache = self.cache.ok_or(Error::MissingCollaborator("statistics cache"))?;
        Ok(StatisticsService::new(source, cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{GroupMetrics, RatingMetrics};
    use crate::field::{RatingFieldConfig, RatingType};
    use crate::source::MemorySource;
    use crate::types::{FieldDescriptor, FieldValue, NOT_SET_LABEL};
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn setup() -> (Arc<MemorySource>, StatisticsService) {
        let source = Arc::new(MemorySource::new());
        source.add_form(Form {
            id: 1,
            handle: "feedback".to_string(),
            title: "Feedback".to_string(),
            fields: vec![
                FieldDescriptor::rating("score", "Score", RatingFieldConfig::new(RatingType::Star, 1, 5)),
                FieldDescriptor::rating("nps", "Recommend", RatingFieldConfig::new(RatingType::Nps, 0, 10)),
                FieldDescriptor::plain("store", "Store", "dropdown"),
            ],
        });
        source.add_form(Form {
            id: 2,
            handle: "contact".to_string(),
            title: "Contact".to_string(),
            fields: vec![FieldDescriptor::plain("email", "Email", "email")],
        });

        let now = Utc::now();
        let rows = [
            (1, Some("North"), 5.0, 10.0),
            (2, Some("North"), 4.0, 9.0),
            (3, Some("South"), 3.0, 6.0),
            (4, None, 5.0, 7.0),
        ];
        for (id, store, score, nps) in rows {
            let mut values = BTreeMap::new();
            values.insert("score".to_string(), FieldValue::Number(score));
            values.insert("nps".to_string(), FieldValue::Number(nps));
            if let Some(store) = store {
                values.insert("store".to_string(), FieldValue::Text(store.to_string()));
            }
            source.add_submission(Submission {
                id,
                form_id: 1,
                created_at: now - Duration::minutes(id),
                values,
            });
        }

        let service = StatisticsService::builder()
            .source(source.clone())
            .cache(Arc::new(StatisticsCache::in_memory()))
            .build()
            .unwrap();
        (source, service)
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = StatisticsService::builder().build().err().unwrap();
        assert!(matches!(err, Error::MissingCollaborator(_)));

        let err = StatisticsService::builder()
            .source(Arc::new(MemorySource::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCollaborator("statistics cache")));
    }

    #[test]
    fn test_forms_with_rating_fields() {
        let (_, service) = setup();
        let forms = service.forms_with_rating_fields().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].rating_field_count, 2);
        assert_eq!(forms[0].total_submissions, 4);
    }

    #[test]
    fn test_field_statistics_cached() {
        let (source, service) = setup();
        let form = service.form(1).unwrap();
        let field = service.rating_field(&form, "score").unwrap();

        let first = service.field_statistics(&form, &field, DateRange::All, None).unwrap();
        assert_eq!(service.cache_count(), 1);

        // New data is not visible until the cache is cleared
        source.remove_submission(1);
        let second = service.field_statistics(&form, &field, DateRange::All, None).unwrap();
        assert_eq!(first, second);

        assert!(service.clear_cache_for_form(1));
        let third = service.field_statistics(&form, &field, DateRange::All, None).unwrap();
        assert_eq!(third.as_summary().unwrap().total_responses, 3);
    }

    #[test]
    fn test_grouped_statistics() {
        let (_, service) = setup();
        let form = service.form(1).unwrap();
        let field = service.rating_field(&form, "score").unwrap();

        let stats = service
            .field_statistics(&form, &field, DateRange::All, Some("store"))
            .unwrap();
        let grouped = stats.as_grouped().unwrap();
        assert_eq!(grouped.group_by_label, "Store");
        assert_eq!(grouped.total_groups, 3);
        assert_eq!(grouped.groups[0].label, "North");
        assert_eq!(grouped.groups[0].count, 2);
        assert_eq!(
            grouped.groups[0].metrics,
            GroupMetrics::Scale(crate::analytics::GroupScale {
                average: 4.5,
                median: 4.5
            })
        );
        assert!(grouped.group(NOT_SET_LABEL).is_some());

        let err = service
            .field_statistics(&form, &field, DateRange::All, Some("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::GroupFieldNotFound(h) if h == "missing"));
    }

    #[test]
    fn test_nps_statistics_and_distribution() {
        let (_, service) = setup();
        let form = service.form(1).unwrap();
        let nps = service.rating_field(&form, "nps").unwrap();

        let stats = service.field_statistics(&form, &nps, DateRange::All, None).unwrap();
        match &stats.as_summary().unwrap().metrics {
            RatingMetrics::Nps(m) => {
                assert_eq!(m.promoters, 2);
                assert_eq!(m.passives, 1);
                assert_eq!(m.detractors, 1);
                assert_eq!(m.nps_score, 25.0);
            }
            other => panic!("unexpected metrics: {other:?}"),
        }

        let distribution = service.distribution_data(&form, &nps, DateRange::All).unwrap();
        assert!(distribution.labels.is_empty());

        let score = service.rating_field(&form, "score").unwrap();
        let distribution = service.distribution_data(&form, &score, DateRange::All).unwrap();
        assert_eq!(distribution.values, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_group_submissions() {
        let (_, service) = setup();
        let form = service.form(1).unwrap();

        let north = service
            .group_submissions(&form, "store", "North", DateRange::All)
            .unwrap();
        assert_eq!(north.len(), 2);

        let unset = service
            .group_submissions(&form, "store", NOT_SET_LABEL, DateRange::All)
            .unwrap();
        assert_eq!(unset.iter().map(|s| s.id).collect::<Vec<_>>(), vec![4]);

        assert!(service
            .group_submissions(&form, "nope", "x", DateRange::All)
            .is_err());
    }

    #[test]
    fn test_trend_and_totals() {
        let (_, service) = setup();
        let form = service.form(1).unwrap();
        let field = service.rating_field(&form, "score").unwrap();

        let trend = service.trend_data(&form, &field, DateRange::All).unwrap();
        assert_eq!(trend.counts.iter().sum::<usize>(), 4);
        assert_eq!(service.total_submissions(&form, DateRange::Last7Days).unwrap(), 4);
        assert!(matches!(service.form(42), Err(Error::FormNotFound(42))));
    }
}
