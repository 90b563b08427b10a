//! # Meilisearch
//!
//! Optional full-text index over submissions for the admin dashboard.
//!
//! Neither store adapter searches server-side, so free-text queries go here. When `MEILI_URL` is
//! not configured, searching fails with `failed-precondition` instead of silently returning
//! nothing.
//!
//!
//!
//! ## Schema
//! - Index `submissions`, primary key `id`
//! - Searchable: name, email, subject, message, tags
//! - Filterable: status, priority
//! - Sortable: createdAtMs, priority
//!
//! Documents are the submission plus `createdAtMs`, the creation time as epoch milliseconds.
//! Meilisearch sorts strings lexicographically, so sorting runs on the number instead of the
//! RFC 3339 `createdAt` string.
//!
//!
//!
//! ## Sync
//! Every create/update/delete mirrors into the index. Index failures are logged and never fail the
//! request: the store stays the source of truth.
use std::sync::Arc;

use contact::{ListQuery, Page, SortField, Submission};
use meilisearch_sdk::{client::Client, settings::Settings};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;

pub const SUBMISSION_INDEX: &str = "submissions";
pub const SUBMISSION_ID: &str = "id";

/// Indexed form of a [`Submission`].
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchDocument<'a> {
    #[serde(flatten)]
    submission: &'a Submission,
    created_at_ms: i64,
}

impl<'a> From<&'a Submission> for SearchDocument<'a> {
    fn from(submission: &'a Submission) -> Self {
        Self {
            submission,
            created_at_ms: submission.created_at.timestamp_millis(),
        }
    }
}

#[derive(Clone)]
pub struct SearchIndex {
    client: Arc<Client>,
}

pub async fn init_meilisearch(
    meili_url: &str,
    meili_admin_key: Option<&str>,
) -> Result<SearchIndex, meilisearch_sdk::errors::Error> {
    let client = Arc::new(Client::new(meili_url, meili_admin_key)?);

    client
        .index(SUBMISSION_INDEX)
        .set_settings(&init_settings())
        .await?;

    Ok(SearchIndex { client })
}

impl SearchIndex {
    pub async fn upsert(&self, submission: &Submission) {
        let result = self
            .client
            .index(SUBMISSION_INDEX)
            .add_or_update(&[SearchDocument::from(submission)], Some(SUBMISSION_ID))
            .await;

        if let Err(e) = result {
            warn!("Failed to index submission {}: {e}", submission.id);
        }
    }

    pub async fn remove(&self, id: Uuid) {
        let result = self
            .client
            .index(SUBMISSION_INDEX)
            .delete_document(id.to_string())
            .await;

        if let Err(e) = result {
            warn!("Failed to remove submission {id} from index: {e}");
        }
    }

    pub async fn search(&self, query: &ListQuery) -> Result<Page<Submission>, AppError> {
        let text = query.search.as_deref().unwrap_or_default();
        let filter = build_filter(query);
        let sort_by = sort_expression(query);
        let sort = [sort_by.as_str()];

        let index = self.client.index(SUBMISSION_INDEX);
        let mut search = index.search();
        search
            .with_query(text)
            .with_offset(query.offset())
            .with_limit(query.page_size as usize)
            .with_sort(&sort);

        if let Some(filter) = filter.as_deref() {
            search.with_filter(filter);
        }

        let results = search
            .execute::<Submission>()
            .await
            .map_err(|e| AppError::Unavailable(format!("search failed: {e}")))?;

        let total = results
            .estimated_total_hits
            .or(results.total_hits)
            .unwrap_or(results.hits.len()) as u64;
        let items = results.hits.into_iter().map(|hit| hit.result).collect();

        Ok(Page::new(items, query, total))
    }
}

pub fn build_filter(query: &ListQuery) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(status) = query.status {
        clauses.push(format!("status = \"{status}\""));
    }

    if let Some(priority) = query.priority {
        clauses.push(format!("priority = {priority}"));
    }

    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

/// Sort field restricted to what the index declares sortable.
pub fn sort_expression(query: &ListQuery) -> String {
    let field = match query.sort_by {
        SortField::Priority => "priority",
        _ => "createdAtMs",
    };

    let order = match query.order {
        contact::SortOrder::Asc => "asc",
        contact::SortOrder::Desc => "desc",
    };

    format!("{field}:{order}")
}

fn init_settings() -> Settings {
    Settings::new()
        .with_ranking_rules([
            "words",
            "typo",
            "proximity",
            "attribute",
            "sort",
            "exactness",
        ])
        .with_searchable_attributes(["subject", "name", "email", "message", "tags"])
        .with_filterable_attributes(["status", "priority"])
        .with_sortable_attributes(["createdAtMs", "priority"])
}
