use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use contact::{ListQuery, Page, StatusCounts, Submission, SubmissionPatch};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    Feedback, NewSubmission, StoreError, SubmissionStore, count, paginate, reject_search,
};

#[derive(Default)]
pub struct MemoryStore {
    submissions: RwLock<HashMap<Uuid, Submission>>,
    views: Mutex<HashMap<String, u64>>,
    feedback: Mutex<Vec<Feedback>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn feedback(&self) -> Vec<Feedback> {
        self.feedback.lock().await.clone()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let submission = new.into_submission(Utc::now());

        self.submissions
            .write()
            .await
            .insert(submission.id, submission.clone());

        Ok(submission)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Submission>, StoreError> {
        reject_search(query)?;

        let all = self.submissions.read().await.values().cloned().collect();

        Ok(paginate(all, query))
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SubmissionPatch,
    ) -> Result<Option<Submission>, StoreError> {
        let mut submissions = self.submissions.write().await;

        Ok(submissions.get_mut(&id).map(|submission| {
            submission.apply(patch, Utc::now());
            submission.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.submissions.write().await.remove(&id).is_some())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let submissions = self.submissions.read().await;

        Ok(count(submissions.values().map(|s| s.status)))
    }

    async fn increment_project_views(&self, slug: &str) -> Result<u64, StoreError> {
        let mut views = self.views.lock().await;
        let count = views.entry(slug.to_string()).or_default();
        *count += 1;

        Ok(*count)
    }

    async fn record_feedback(&self, feedback: Feedback) -> Result<(), StoreError> {
        self.feedback.lock().await.push(feedback);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use contact::{Priority, SubmissionStatus};

    use super::*;
    use crate::store::{Provenance, tests::form};

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();

        let created = store.create(form("Ada")).await.unwrap();
        let found = store.get(created.id).await.unwrap();

        assert_eq!(found, Some(created));
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_only_requested_fields() {
        let store = MemoryStore::new();
        let created = store.create(form("Ada")).await.unwrap();

        let patch = SubmissionPatch {
            priority: Some(Priority::new(4)),
            ..Default::default()
        };
        let updated = store.update(created.id, &patch).await.unwrap().unwrap();

        assert_eq!(updated.priority, Priority::new(4));
        assert_eq!(updated.status, SubmissionStatus::New);
        assert_eq!(updated.message, created.message);
        assert!(updated.updated_at >= created.updated_at);

        assert!(store.update(Uuid::new_v4(), &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        let created = store.create(form("Ada")).await.unwrap();

        assert!(store.delete(created.id).await.unwrap());
        assert!(!store.delete(created.id).await.unwrap());
        assert_eq!(store.count_by_status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_list_rejects_search() {
        let store = MemoryStore::new();
        let query = ListQuery {
            search: Some("ada".into()),
            ..Default::default()
        };

        assert!(matches!(
            store.list(&query).await,
            Err(StoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_project_views_increment() {
        let store = MemoryStore::new();

        assert_eq!(store.increment_project_views("raytracer").await.unwrap(), 1);
        assert_eq!(store.increment_project_views("raytracer").await.unwrap(), 2);
        assert_eq!(store.increment_project_views("compiler").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_feedback() {
        let store = MemoryStore::new();
        let feedback = Feedback::new(
            contact::FeedbackForm {
                rating: 5,
                message: Some("  great  ".into()),
                page: Some("/projects".into()),
            },
            Provenance::default(),
        );

        store.record_feedback(feedback).await.unwrap();

        let stored = store.feedback().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message.as_deref(), Some("great"));
    }
}
