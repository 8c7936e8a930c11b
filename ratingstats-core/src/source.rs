//! Host collaborators
//!
//! The statistics engine never owns forms or submissions. It reads them
//! through these traits, implemented by the host (see [`crate::db::Database`]
//! for the SQLite reference host, and [`MemorySource`] for tests).

use crate::error::Result;
use crate::types::{FieldDescriptor, Form, Submission};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Read access to form definitions
pub trait FormRegistry: Send + Sync {
    /// All forms, ordered by id
    fn forms(&self) -> Result<Vec<Form>>;

    fn form(&self, id: i64) -> Result<Option<Form>>;

    /// Total stored submissions for a form, regardless of date
    fn count_submissions(&self, form_id: i64) -> Result<usize>;

    /// Field descriptors of a form; empty when the form does not exist
    fn fields_of(&self, form_id: i64) -> Result<Vec<FieldDescriptor>> {
        Ok(self.form(form_id)?.map(|f| f.fields).unwrap_or_default())
    }
}

/// Read access to submissions
pub trait SubmissionReader: Send + Sync {
    /// Submissions of a form created at or after `since`, newest first
    fn submissions(&self, form_id: i64, since: Option<DateTime<Utc>>) -> Result<Vec<Submission>>;
}

/// A host providing both forms and submissions
pub trait FormSource: FormRegistry + SubmissionReader {}

impl<T: FormRegistry + SubmissionReader> FormSource for T {}

// ============================================
// In-memory host
// ============================================

/// Forms and submissions held in memory
#[derive(Default)]
pub struct MemorySource {
    forms: RwLock<BTreeMap<i64, Form>>,
    submissions: RwLock<Vec<Submission>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_form(&self, form: Form) {
        self.forms.write().unwrap().insert(form.id, form);
    }

    pub fn remove_form(&self, form_id: i64) {
        self.forms.write().unwrap().remove(&form_id);
        self.submissions
            .write()
            .unwrap()
            .retain(|s| s.form_id != form_id);
    }

    pub fn add_submission(&self, submission: Submission) {
        self.submissions.write().unwrap().push(submission);
    }

    pub fn remove_submission(&self, id: i64) -> bool {
        let mut submissions = self.submissions.write().unwrap();
        let before = submissions.len();
        submissions.retain(|s| s.id != id);
        submissions.len() != before
    }
}

impl FormRegistry for MemorySource {
    fn forms(&self) -> Result<Vec<Form>> {
        Ok(self.forms.read().unwrap().values().cloned().collect())
    }

    fn form(&self, id: i64) -> Result<Option<Form>> {
        Ok(self.forms.read().unwrap().get(&id).cloned())
    }

    fn count_submissions(&self, form_id: i64) -> Result<usize> {
        Ok(self
            .submissions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.form_id == form_id)
            .count())
    }
}

impl SubmissionReader for MemorySource {
    fn submissions(&self, form_id: i64, since: Option<DateTime<Utc>>) -> Result<Vec<Submission>> {
        let mut matching: Vec<Submission> = self
            .submissions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.form_id == form_id)
            .filter(|s| since.map_or(true, |since| s.created_at >= since))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching)
    }
}
