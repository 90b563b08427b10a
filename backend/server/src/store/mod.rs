//! # Submission Store
//!
//! One persistence interface, one adapter chosen by `STORE_BACKEND`.
//!
//! - [`MemoryStore`]: process-local maps, used for development and tests
//! - [`RedisStore`]: JSON documents plus sorted-set indexes for paging
//!
//! ## Paging
//!
//! Offset based. Both adapters share [`matches`], [`compare`] and [`paginate`] so sort and filter
//! semantics stay identical. The Redis adapter skips the in-memory pass when it can page directly
//! on a creation-time index.
use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contact::{
    ContactForm, FeedbackForm, ListQuery, Page, SortField, SortOrder, StatusCounts, Submission,
    SubmissionPatch, SubmissionStatus,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Corrupt document: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Gave up after repeated concurrent writes to {0}")]
    Contention(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Where a public payload came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub source: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub form: ContactForm,
    pub provenance: Provenance,
}

impl NewSubmission {
    pub fn into_submission(self, now: DateTime<Utc>) -> Submission {
        let form = self.form.normalized();

        Submission {
            id: Uuid::new_v4(),
            name: form.name,
            email: form.email,
            subject: form.subject,
            message: form.message,
            created_at: now,
            updated_at: now,
            status: SubmissionStatus::New,
            priority: None,
            tags: Vec::new(),
            source: self.provenance.source,
            user_agent: self.provenance.user_agent,
            ip: self.provenance.ip,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub rating: u8,
    pub message: Option<String>,
    pub page: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl Feedback {
    pub fn new(form: FeedbackForm, provenance: Provenance) -> Self {
        Self {
            id: Uuid::new_v4(),
            rating: form.rating,
            message: form
                .message
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            page: form.page,
            created_at: Utc::now(),
            user_agent: provenance.user_agent,
            ip: provenance.ip,
        }
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;

    /// Pages through submissions. Free-text search is not handled here.
    async fn list(&self, query: &ListQuery) -> Result<Page<Submission>, StoreError>;

    /// Returns `None` when the submission does not exist.
    async fn update(
        &self,
        id: Uuid,
        patch: &SubmissionPatch,
    ) -> Result<Option<Submission>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;

    async fn increment_project_views(&self, slug: &str) -> Result<u64, StoreError>;

    async fn record_feedback(&self, feedback: Feedback) -> Result<(), StoreError>;
}

pub fn reject_search(query: &ListQuery) -> Result<(), StoreError> {
    match query.search {
        Some(_) => Err(StoreError::Unsupported(
            "Search is not supported by the configured backend".to_string(),
        )),
        None => Ok(()),
    }
}

pub fn matches(submission: &Submission, query: &ListQuery) -> bool {
    query.status.is_none_or(|status| submission.status == status)
        && query
            .priority
            .is_none_or(|priority| submission.priority == Some(priority))
}

pub fn compare(a: &Submission, b: &Submission, field: SortField, order: SortOrder) -> Ordering {
    let ordering = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortField::Email => a.email.cmp(&b.email),
        SortField::Subject => a.subject.to_lowercase().cmp(&b.subject.to_lowercase()),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        SortField::Priority => a.priority.cmp(&b.priority),
    }
    .then_with(|| a.id.cmp(&b.id));

    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

/// Filters, sorts and slices a full set of submissions.
pub fn paginate(mut submissions: Vec<Submission>, query: &ListQuery) -> Page<Submission> {
    submissions.retain(|submission| matches(submission, query));
    submissions.sort_by(|a, b| compare(a, b, query.sort_by, query.order));

    let total = submissions.len() as u64;
    let items = submissions
        .into_iter()
        .skip(query.offset())
        .take(query.page_size as usize)
        .collect();

    Page::new(items, query, total)
}

pub fn count(submissions: impl Iterator<Item = SubmissionStatus>) -> StatusCounts {
    let mut counts = StatusCounts::default();

    for status in SubmissionStatus::ALL {
        counts.by_status.insert(status.to_string(), 0);
    }

    for status in submissions {
        counts.total += 1;
        *counts.by_status.entry(status.to_string()).or_default() += 1;
    }

    counts
}
