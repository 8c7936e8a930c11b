//! Submission lifecycle hooks
//!
//! With a `manual` schedule the cache is only as fresh as the last
//! invalidation, so saving or deleting a submission clears it. Any other
//! schedule leaves the cache alone until the next regeneration.

use crate::jobs::Schedule;
use crate::service::StatisticsService;
use std::sync::Arc;

pub struct SubmissionEvents {
    service: Arc<StatisticsService>,
    schedule: Schedule,
}

impl SubmissionEvents {
    pub fn new(service: Arc<StatisticsService>, schedule: Schedule) -> Self {
        Self { service, schedule }
    }

    /// Returns whether the cache was invalidated
    pub fn on_submission_saved(&self, form_id: i64) -> bool {
        self.invalidate(form_id, "saved")
    }

    /// Returns whether the cache was invalidated
    pub fn on_submission_deleted(&self, form_id: i64) -> bool {
        self.invalidate(form_id, "deleted")
    }

    fn invalidate(&self, form_id: i64, event: &str) -> bool {
        if !self.schedule.is_manual() {
            return false;
        }
        let cleared = self.service.clear_cache_for_form(form_id);
        tracing::debug!(form_id, event, cleared, "Submission invalidated statistics cache");
        true
    }
}
