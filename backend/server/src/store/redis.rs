//! # Redis
//!
//! Document store for submissions.
//!
//! ## Layout
//!
//! - `submission:{id}`: JSON document
//! - `submissions:created`: sorted set of ids scored by creation time (ms)
//! - `submissions:status:{status}`: same, one set per workflow status
//! - `project:views:{slug}`: counter, `INCR` keeps the increment atomic
//! - `feedback`: list of JSON documents, newest first
//!
//! ## Paging
//!
//! Sorting by creation time pages straight off the sorted set with `ZREVRANGE`/`ZRANGE`, using the
//! per-status set when a status filter is present. Any other sort field or a priority filter loads
//! the candidate set and sorts in memory.
//!
//! ## Writes
//!
//! Updates and deletes run as Lua scripts so the document and every index change together.
//! - Update is compare-and-set against the document it read, retried on a concurrent change
//! - Update removes the member from every other status set, so an id lives in exactly one
//! - Neither script recreates a document that is already gone
use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use contact::{
    ListQuery, Page, SortField, SortOrder, StatusCounts, Submission, SubmissionPatch,
    SubmissionStatus,
};
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Feedback, NewSubmission, StoreError, SubmissionStore, paginate, reject_search};

const CREATED_INDEX: &str = "submissions:created";
const FEEDBACK_LIST: &str = "feedback";
const MAX_UPDATE_ATTEMPTS: usize = 8;

/// KEYS: document, target status set, other status sets.
/// ARGV: new document, member, score, expected current document.
/// Returns 1 on write, 0 when missing, -1 when the document changed underneath.
static UPDATE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
if current ~= ARGV[4] then return -1 end
redis.call('SET', KEYS[1], ARGV[1])
for i = 3, #KEYS do redis.call('ZREM', KEYS[i], ARGV[2]) end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
return 1
",
    )
});

/// KEYS: document, creation index, every status set. ARGV: member.
static DELETE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('DEL', KEYS[1]) == 0 then return 0 end
for i = 2, #KEYS do redis.call('ZREM', KEYS[i], ARGV[1]) end
return 1
",
    )
});

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

fn document_key(id: Uuid) -> String {
    format!("submission:{id}")
}

fn status_index(status: SubmissionStatus) -> String {
    format!("submissions:status:{status}")
}

fn score(submission: &Submission) -> i64 {
    submission.created_at.timestamp_millis()
}

/// Keys for [`UPDATE_SCRIPT`]: the target set second, every other status set after it.
fn update_keys(id: Uuid, status: SubmissionStatus) -> Vec<String> {
    let mut keys = vec![document_key(id), status_index(status)];
    keys.extend(
        SubmissionStatus::ALL
            .into_iter()
            .filter(|other| *other != status)
            .map(status_index),
    );
    keys
}

fn delete_keys(id: Uuid) -> Vec<String> {
    let mut keys = vec![document_key(id), CREATED_INDEX.to_string()];
    keys.extend(SubmissionStatus::ALL.into_iter().map(status_index));
    keys
}

/// Sorted set a listing reads from.
fn list_index(query: &ListQuery) -> String {
    match query.status {
        Some(status) => status_index(status),
        None => CREATED_INDEX.to_string(),
    }
}

/// Whether the page can be cut straight from the sorted set.
fn pages_on_index(query: &ListQuery) -> bool {
    query.sort_by == SortField::CreatedAt && query.priority.is_none()
}

/// Inclusive `ZRANGE` bounds for the requested page.
fn page_range(query: &ListQuery) -> (isize, isize) {
    let start = query.offset() as isize;
    (start, start + query.page_size as isize - 1)
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn load(&self, ids: &[String]) -> Result<Vec<Submission>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("submission:{id}")).collect();

        let mut connection = self.connection.clone();
        let documents: Vec<Option<String>> = connection.mget(&keys).await?;

        let mut submissions = Vec::with_capacity(documents.len());
        for (key, document) in keys.iter().zip(documents) {
            match document {
                Some(json) => submissions.push(serde_json::from_str(&json)?),
                None => warn!("Index references missing document {key}"),
            }
        }

        Ok(submissions)
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn create(&self, new: NewSubmission) -> Result<Submission, StoreError> {
        let submission = new.into_submission(Utc::now());
        let id = submission.id.to_string();

        let mut connection = self.connection.clone();
        redis::pipe()
            .atomic()
            .set(document_key(submission.id), serde_json::to_string(&submission)?)
            .zadd(CREATED_INDEX, &id, score(&submission))
            .zadd(status_index(submission.status), &id, score(&submission))
            .query_async::<()>(&mut connection)
            .await?;

        Ok(submission)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let mut connection = self.connection.clone();
        let document: Option<String> = connection.get(document_key(id)).await?;

        Ok(document
            .map(|json| serde_json::from_str(&json))
            .transpose()?)
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Submission>, StoreError> {
        reject_search(query)?;

        let index = list_index(query);
        let mut connection = self.connection.clone();

        if pages_on_index(query) {
            let total: u64 = connection.zcard(&index).await?;
            let (start, stop) = page_range(query);

            let ids: Vec<String> = match query.order {
                SortOrder::Desc => connection.zrevrange(&index, start, stop).await?,
                SortOrder::Asc => connection.zrange(&index, start, stop).await?,
            };

            return Ok(Page::new(self.load(&ids).await?, query, total));
        }

        let ids: Vec<String> = connection.zrange(&index, 0, -1).await?;

        Ok(paginate(self.load(&ids).await?, query))
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &SubmissionPatch,
    ) -> Result<Option<Submission>, StoreError> {
        let mut connection = self.connection.clone();

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current: Option<String> = connection.get(document_key(id)).await?;
            let Some(current) = current else {
                return Ok(None);
            };

            let mut submission: Submission = serde_json::from_str(&current)?;
            submission.apply(patch, Utc::now());

            let mut invocation = UPDATE_SCRIPT.prepare_invoke();
            for key in update_keys(id, submission.status) {
                invocation.key(key);
            }
            invocation
                .arg(serde_json::to_string(&submission)?)
                .arg(id.to_string())
                .arg(score(&submission))
                .arg(&current);

            match invocation.invoke_async::<i64>(&mut connection).await? {
                1 => return Ok(Some(submission)),
                0 => return Ok(None),
                _ => debug!("Submission {id} changed during update, retrying"),
            }
        }

        Err(StoreError::Contention(format!("submission {id}")))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut invocation = DELETE_SCRIPT.prepare_invoke();
        for key in delete_keys(id) {
            invocation.key(key);
        }
        invocation.arg(id.to_string());

        let mut connection = self.connection.clone();
        let deleted: i64 = invocation.invoke_async(&mut connection).await?;

        Ok(deleted == 1)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut connection = self.connection.clone();
        let mut counts = StatusCounts {
            total: connection.zcard(CREATED_INDEX).await?,
            ..Default::default()
        };

        for status in SubmissionStatus::ALL {
            let count: u64 = connection.zcard(status_index(status)).await?;
            counts.by_status.insert(status.to_string(), count);
        }

        Ok(counts)
    }

    async fn increment_project_views(&self, slug: &str) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();

        Ok(connection.incr(format!("project:views:{slug}"), 1).await?)
    }

    async fn record_feedback(&self, feedback: Feedback) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .lpush(FEEDBACK_LIST, serde_json::to_string(&feedback)?)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use contact::Priority;

    use super::*;
    use crate::store::tests::form;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();

        assert_eq!(
            document_key(id),
            "submission:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            status_index(SubmissionStatus::Replied),
            "submissions:status:replied"
        );
    }

    #[test]
    fn test_update_keys_cover_every_status_set() {
        let id = Uuid::nil();
        let keys = update_keys(id, SubmissionStatus::Read);

        assert_eq!(keys.len(), 1 + SubmissionStatus::ALL.len());
        assert_eq!(keys[0], document_key(id));
        assert_eq!(keys[1], "submissions:status:read");
        assert!(!keys[2..].contains(&keys[1]));
        for status in SubmissionStatus::ALL {
            assert!(keys.contains(&status_index(status)));
        }
    }

    #[test]
    fn test_delete_keys_cover_every_index() {
        let id = Uuid::nil();
        let keys = delete_keys(id);

        assert_eq!(keys[0], document_key(id));
        assert_eq!(keys[1], CREATED_INDEX);
        for status in SubmissionStatus::ALL {
            assert!(keys.contains(&status_index(status)));
        }
    }

    #[test]
    fn test_list_reads_status_set_when_filtered() {
        let mut query = ListQuery::default();
        assert_eq!(list_index(&query), CREATED_INDEX);
        assert!(pages_on_index(&query));

        query.status = Some(SubmissionStatus::Archived);
        assert_eq!(list_index(&query), "submissions:status:archived");
        assert!(pages_on_index(&query));

        query.priority = Priority::new(2);
        assert!(!pages_on_index(&query));

        query.priority = None;
        query.sort_by = SortField::Priority;
        assert!(!pages_on_index(&query));
    }

    #[test]
    fn test_page_range() {
        let query = ListQuery {
            page: 3,
            page_size: 10,
            ..Default::default()
        };
        assert_eq!(page_range(&query), (20, 29));

        let query = ListQuery {
            page: 1,
            page_size: 1,
            ..Default::default()
        };
        assert_eq!(page_range(&query), (0, 0));
    }

    async fn live_store() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
        let mut connection = init_redis(&url).await.unwrap();
        let _: () = ::redis::cmd("FLUSHDB").query_async(&mut connection).await.unwrap();

        RedisStore::new(connection)
    }

    async fn assert_indexes_consistent(store: &RedisStore) {
        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.by_status.values().sum::<u64>(), counts.total);

        let page = store
            .list(&ListQuery {
                page_size: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, counts.total);

        let mut connection = store.connection.clone();
        for submission in page.items {
            for status in SubmissionStatus::ALL {
                let score: Option<i64> = connection
                    .zscore(status_index(status), submission.id.to_string())
                    .await
                    .unwrap();
                assert_eq!(score.is_some(), status == submission.status);
            }
        }
    }

    #[tokio::test]
    #[ignore = "needs a Redis server, set REDIS_URL"]
    async fn test_redis_store_round_trip() {
        let store = live_store().await;

        let first = store.create(form("Ada")).await.unwrap();
        let second = store.create(form("Grace")).await.unwrap();

        let page = store.list(&ListQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, second.id);

        let patch = SubmissionPatch {
            status: Some(SubmissionStatus::Read),
            ..Default::default()
        };
        store.update(first.id, &patch).await.unwrap().unwrap();

        let read = store
            .list(&ListQuery {
                status: Some(SubmissionStatus::Read),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(read.total, 1);
        assert_eq!(read.items[0].id, first.id);

        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        assert!(store.update(first.id, &patch).await.unwrap().is_none());
        assert_indexes_consistent(&store).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server, set REDIS_URL"]
    async fn test_concurrent_status_changes_keep_one_index() {
        let store = live_store().await;

        for _ in 0..20 {
            let created = store.create(form("Ada")).await.unwrap();

            let read = SubmissionPatch {
                status: Some(SubmissionStatus::Read),
                ..Default::default()
            };
            let replied = SubmissionPatch {
                status: Some(SubmissionStatus::Replied),
                ..Default::default()
            };

            let (a, b) = tokio::join!(store.update(created.id, &read), store.update(created.id, &replied));
            a.unwrap().unwrap();
            b.unwrap().unwrap();
        }

        assert_indexes_consistent(&store).await;
    }

    #[tokio::test]
    #[ignore = "needs a Redis server, set REDIS_URL"]
    async fn test_update_racing_delete_leaves_nothing_behind() {
        let store = live_store().await;

        for _ in 0..20 {
            let created = store.create(form("Ada")).await.unwrap();
            let patch = SubmissionPatch {
                status: Some(SubmissionStatus::Archived),
                ..Default::default()
            };

            let (updated, deleted) = tokio::join!(store.update(created.id, &patch), store.delete(created.id));
            updated.unwrap();
            assert!(deleted.unwrap());
            assert_eq!(store.get(created.id).await.unwrap(), None);
        }

        assert_indexes_consistent(&store).await;
        assert_eq!(store.count_by_status().await.unwrap().total, 0);
    }
}
