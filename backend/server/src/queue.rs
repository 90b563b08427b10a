//! # Email Queue
//!
//! Bounded-retry job queue for outgoing email.
//!
//! Email delivery must never fail a form submission, so handlers only [`EmailQueue::enqueue`] and
//! return. A background worker drains the queue.
//!
//! ## Processing
//!
//! - Every `process_interval` the worker calls [`EmailQueue::tick`]
//! - Due pending jobs launch highest priority first, oldest first within a priority
//! - At most `max_concurrent` sends are in flight, launches are spaced by `send_delay`
//!
//! ## Failure
//!
//! - Each failure bumps `attempts`
//! - Below `max_attempts` the job waits `base_backoff * 2^(attempts - 1)`, capped at `max_backoff`
//! - At `max_attempts` the job is marked failed and stays until an admin retries it
//!
//! ## Retention
//!
//! Only the newest `keep_sent` sent jobs are kept. Older ones are dropped as new sends complete.
//!
//! ## Snapshot
//!
//! With `EMAIL_QUEUE_SNAPSHOT` set, the job list is written as JSON after every state change and
//! read back on startup. Jobs caught mid-send come back as pending. Snapshot errors are logged only.
//! Snapshots are serialized and written under one lock, so the file on disk is never older than
//! a write that finished before it.
use std::{
    collections::HashSet,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use contact::QueueStats;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::QueueConfig,
    mailer::{MailTransport, OutgoingEmail},
};

pub const OWNER_NOTIFICATION_PRIORITY: u8 = 10;
pub const CONFIRMATION_PRIORITY: u8 = 5;
pub const FEEDBACK_PRIORITY: u8 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub id: Uuid,
    pub email: OutgoingEmail,
    pub priority: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl EmailJob {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_attempt_at <= now
    }
}

/// Delay before the next attempt after `attempts` failures.
pub fn backoff(config: &QueueConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);

    config
        .base_backoff
        .saturating_mul(1u32 << exponent)
        .min(config.max_backoff)
}

#[derive(Clone)]
pub struct EmailQueue {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Mutex<Vec<EmailJob>>,
    snapshot: Mutex<()>,
    in_flight: AtomicUsize,
    transport: Arc<dyn MailTransport>,
    config: QueueConfig,
}

impl EmailQueue {
    pub fn new(config: QueueConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self::with_jobs(config, transport, Vec::new())
    }

    fn with_jobs(config: QueueConfig, transport: Arc<dyn MailTransport>, mut jobs: Vec<EmailJob>) -> Self {
        prune_sent(&mut jobs, config.keep_sent);

        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(jobs),
                snapshot: Mutex::new(()),
                in_flight: AtomicUsize::new(0),
                transport,
                config,
            }),
        }
    }

    /// Builds the queue, reloading the snapshot when one is configured.
    pub async fn restore(config: QueueConfig, transport: Arc<dyn MailTransport>) -> Self {
        let jobs = match &config.snapshot_path {
            Some(path) => load_snapshot(path).await,
            None => Vec::new(),
        };

        if !jobs.is_empty() {
            info!("Restored {} email jobs from snapshot", jobs.len());
        }

        Self::with_jobs(config, transport, jobs)
    }

    pub async fn enqueue(&self, email: OutgoingEmail, priority: u8) -> Uuid {
        let now = Utc::now();
        let job = EmailJob {
            id: Uuid::new_v4(),
            email,
            priority,
            attempts: 0,
            max_attempts: self.inner.config.max_attempts.max(1),
            status: JobStatus::Pending,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            sent_at: None,
        };
        let id = job.id;

        debug!("Queued email {id} to {}", job.email.to);

        self.inner.jobs.lock().await.push(job);
        self.persist().await;

        id
    }

    pub async fn jobs(&self) -> Vec<EmailJob> {
        self.inner.jobs.lock().await.clone()
    }

    pub async fn stats(&self) -> QueueStats {
        let jobs = self.inner.jobs.lock().await;
        let mut stats = QueueStats::default();

        for job in jobs.iter() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Sending => stats.sending += 1,
                JobStatus::Sent => stats.sent += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Puts every failed job back in line with a fresh attempt budget.
    pub async fn retry_failed(&self) -> usize {
        let now = Utc::now();
        let mut retried = 0;

        {
            let mut jobs = self.inner.jobs.lock().await;
            for job in jobs.iter_mut().filter(|job| job.status == JobStatus::Failed) {
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.next_attempt_at = now;
                retried += 1;
            }
        }

        if retried > 0 {
            self.persist().await;
        }

        retried
    }

    pub async fn clear_sent(&self) -> usize {
        let removed = {
            let mut jobs = self.inner.jobs.lock().await;
            let before = jobs.len();
            jobs.retain(|job| job.status != JobStatus::Sent);
            before - jobs.len()
        };

        if removed > 0 {
            self.persist().await;
        }

        removed
    }

    /// Launches due jobs up to the concurrency cap.
    ///
    /// Returns the handles of the sends it started.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        loop {
            if self.inner.in_flight.load(Ordering::SeqCst) >= self.inner.config.max_concurrent {
                break;
            }

            let Some(job) = self.claim_next(now).await else {
                break;
            };

            if !handles.is_empty() && !self.inner.config.send_delay.is_zero() {
                sleep(self.inner.config.send_delay).await;
            }

            let queue = self.clone();
            handles.push(tokio::spawn(async move {
                let result = queue.inner.transport.send(&job.email).await;
                queue
                    .complete(job.id, result.map_err(|e| e.to_string()), Utc::now())
                    .await;
            }));
        }

        handles
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Option<EmailJob> {
        let claimed = {
            let mut jobs = self.inner.jobs.lock().await;

            let job = jobs
                .iter_mut()
                .filter(|job| job.is_due(now))
                .min_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                })?;

            job.status = JobStatus::Sending;
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            job.clone()
        };

        self.persist().await;

        Some(claimed)
    }

    async fn complete(&self, id: Uuid, result: Result<(), String>, now: DateTime<Utc>) {
        {
            let mut jobs = self.inner.jobs.lock().await;

            if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
                match result {
                    Ok(()) => {
                        job.status = JobStatus::Sent;
                        job.sent_at = Some(now);
                        job.last_error = None;
                        info!("Email {id} sent to {}", job.email.to);
                    }
                    Err(e) => {
                        job.attempts += 1;
                        job.last_error = Some(e.clone());

                        if job.attempts >= job.max_attempts {
                            job.status = JobStatus::Failed;
                            warn!("Email {id} failed after {} attempts: {e}", job.attempts);
                        } else {
                            let delay = backoff(&self.inner.config, job.attempts);
                            job.status = JobStatus::Pending;
                            job.next_attempt_at = now
                                + chrono::Duration::from_std(delay)
                                    .unwrap_or_else(|_| chrono::Duration::days(1));
                            warn!(
                                "Email {id} attempt {} failed, retrying in {delay:?}: {e}",
                                job.attempts
                            );
                        }
                    }
                }
            }

            prune_sent(&mut jobs, self.inner.config.keep_sent);
        }

        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(path) = &self.inner.config.snapshot_path else {
            return;
        };

        let _snapshot = self.inner.snapshot.lock().await;

        let json = {
            let jobs = self.inner.jobs.lock().await;
            serde_json::to_vec(&*jobs)
        };

        let result = match json {
            Ok(bytes) => write_atomically(path, &bytes).await,
            Err(e) => Err(std::io::Error::other(e)),
        };

        if let Err(e) = result {
            warn!("Failed to snapshot email queue to {}: {e}", path.display());
        }
    }

    /// Runs [`EmailQueue::tick`] on a fixed interval until `shutdown` flips.
    pub fn spawn_worker(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(queue.inner.config.process_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Email worker running every {:?}, max {} concurrent",
                queue.inner.config.process_interval, queue.inner.config.max_concurrent
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        queue.tick(Utc::now()).await;
                    }
                    _ = shutdown.changed() => {
                        info!("Email worker stopping");
                        break;
                    }
                }
            }
        })
    }
}

/// Drops all but the `keep` most recently sent jobs.
fn prune_sent(jobs: &mut Vec<EmailJob>, keep: usize) {
    let mut sent: Vec<(DateTime<Utc>, Uuid)> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Sent)
        .map(|job| (job.sent_at.unwrap_or(job.created_at), job.id))
        .collect();

    if sent.len() <= keep {
        return;
    }

    sent.sort_unstable_by(|a, b| b.cmp(a));
    let dropped: HashSet<Uuid> = sent.into_iter().skip(keep).map(|(_, id)| id).collect();

    debug!("Dropping {} old sent email jobs", dropped.len());
    jobs.retain(|job| !dropped.contains(&job.id));
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn load_snapshot(path: &Path) -> Vec<EmailJob> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read email queue snapshot {}: {e}", path.display());
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<EmailJob>>(&bytes) {
        Ok(mut jobs) => {
            for job in jobs.iter_mut().filter(|job| job.status == JobStatus::Sending) {
                job.status = JobStatus::Pending;
            }
            jobs
        }
        Err(e) => {
            warn!("Discarding corrupt email queue snapshot {}: {e}", path.display());
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::mailer::MailError;

    /// Fails the first `failures` sends, then succeeds. Records recipients in send order.
    #[derive(Default)]
    struct FlakyTransport {
        failures: AtomicU32,
        sent: Mutex<Vec<String>>,
    }

    impl FlakyTransport {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl MailTransport for FlakyTransport {
        async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(MailError::Address("smtp down".into()));
            }

            self.sent.lock().await.push(email.to.clone());
            Ok(())
        }
    }

    fn config() -> QueueConfig {
        QueueConfig {
            send_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            reply_to: None,
            subject: "Hi".into(),
            body: "Body".into(),
        }
    }

    async fn run(queue: &EmailQueue, now: DateTime<Utc>) -> usize {
        let handles = queue.tick(now).await;
        let launched = handles.len();

        for handle in handles {
            handle.await.unwrap();
        }

        launched
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = QueueConfig {
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            ..Default::default()
        };

        assert_eq!(backoff(&config, 1), Duration::from_secs(2));
        assert_eq!(backoff(&config, 2), Duration::from_secs(4));
        assert_eq!(backoff(&config, 3), Duration::from_secs(8));
        assert_eq!(backoff(&config, 4), Duration::from_secs(10));
        assert_eq!(backoff(&config, 40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sends_by_priority() {
        let transport = FlakyTransport::failing(0);
        let queue = EmailQueue::new(
            QueueConfig {
                max_concurrent: 1,
                ..config()
            },
            transport.clone(),
        );

        queue.enqueue(email("low@x.dev"), FEEDBACK_PRIORITY).await;
        queue.enqueue(email("high@x.dev"), OWNER_NOTIFICATION_PRIORITY).await;
        queue.enqueue(email("mid@x.dev"), CONFIRMATION_PRIORITY).await;

        let later = Utc::now() + chrono::Duration::seconds(1);
        for _ in 0..3 {
            assert_eq!(run(&queue, later).await, 1);
        }

        assert_eq!(
            *transport.sent.lock().await,
            vec!["high@x.dev", "mid@x.dev", "low@x.dev"]
        );
        assert_eq!(queue.stats().await.sent, 3);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let queue = EmailQueue::new(
            QueueConfig {
                max_concurrent: 2,
                ..config()
            },
            FlakyTransport::failing(0),
        );

        for i in 0..5 {
            queue.enqueue(email(&format!("{i}@x.dev")), 1).await;
        }

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(run(&queue, later).await, 2);
        assert_eq!(queue.stats().await.pending, 3);
    }

    #[tokio::test]
    async fn test_failure_backs_off_then_succeeds() {
        let queue = EmailQueue::new(config(), FlakyTransport::failing(1));
        queue.enqueue(email("a@x.dev"), 1).await;

        let now = Utc::now() + chrono::Duration::seconds(1);
        run(&queue, now).await;

        let job = queue.jobs().await.remove(0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_attempt_at > now);
        assert_eq!(job.last_error.as_deref(), Some("Invalid address smtp down"));

        // Not due yet.
        assert_eq!(run(&queue, now).await, 0);

        let later = job.next_attempt_at + chrono::Duration::seconds(1);
        assert_eq!(run(&queue, later).await, 1);
        assert_eq!(queue.jobs().await[0].status, JobStatus::Sent);
    }

    #[tokio::test]
    async fn test_marks_failed_after_max_attempts() {
        let queue = EmailQueue::new(
            QueueConfig {
                max_attempts: 2,
                ..config()
            },
            FlakyTransport::failing(10),
        );
        queue.enqueue(email("a@x.dev"), 1).await;

        let far = Utc::now() + chrono::Duration::days(1);
        run(&queue, far).await;
        run(&queue, far).await;

        let job = queue.jobs().await.remove(0);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);

        // Failed jobs are not picked up again.
        assert_eq!(run(&queue, far).await, 0);

        assert_eq!(queue.retry_failed().await, 1);
        assert_eq!(queue.jobs().await[0].attempts, 0);
        assert_eq!(queue.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_clear_sent() {
        let queue = EmailQueue::new(config(), FlakyTransport::failing(0));
        queue.enqueue(email("a@x.dev"), 1).await;
        run(&queue, Utc::now() + chrono::Duration::seconds(1)).await;

        assert_eq!(queue.clear_sent().await, 1);
        assert!(queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_keeps_only_recent_sent() {
        let queue = EmailQueue::new(
            QueueConfig {
                keep_sent: 2,
                max_concurrent: 1,
                ..config()
            },
            FlakyTransport::failing(0),
        );

        for i in 0..5 {
            queue.enqueue(email(&format!("{i}@x.dev")), 1).await;
        }
        queue.enqueue(email("stuck@x.dev"), 1).await;
        queue.inner.jobs.lock().await[5].status = JobStatus::Failed;

        let later = Utc::now() + chrono::Duration::seconds(1);
        for _ in 0..5 {
            assert_eq!(run(&queue, later).await, 1);
        }

        let stats = queue.stats().await;
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);

        let kept: Vec<String> = queue
            .jobs()
            .await
            .into_iter()
            .filter(|job| job.status == JobStatus::Sent)
            .map(|job| job.email.to)
            .collect();
        assert_eq!(kept, vec!["3@x.dev", "4@x.dev"]);
    }

    #[test]
    fn test_prune_sent_without_retention() {
        let now = Utc::now();
        let job = |status| EmailJob {
            id: Uuid::new_v4(),
            email: email("a@x.dev"),
            priority: 1,
            attempts: 0,
            max_attempts: 3,
            status,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            sent_at: Some(now),
        };

        let mut jobs = vec![job(JobStatus::Sent), job(JobStatus::Pending), job(JobStatus::Sent)];
        prune_sent(&mut jobs, 0);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueues_all_reach_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig {
            snapshot_path: Some(dir.path().join("queue.json")),
            ..config()
        };
        let queue = EmailQueue::new(config.clone(), FlakyTransport::failing(0));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.enqueue(email(&format!("{i}@x.dev")), 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let restored = EmailQueue::restore(config, FlakyTransport::failing(0)).await;
        assert_eq!(restored.jobs().await.len(), 32);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_resets_sending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let config = QueueConfig {
            snapshot_path: Some(path.clone()),
            ..config()
        };

        let queue = EmailQueue::new(config.clone(), FlakyTransport::failing(0));
        queue.enqueue(email("a@x.dev"), 1).await;

        // Simulate a crash mid-send.
        queue.inner.jobs.lock().await[0].status = JobStatus::Sending;
        queue.persist().await;

        let restored = EmailQueue::restore(config, FlakyTransport::failing(0)).await;
        let jobs = restored.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].email.to, "a@x.dev");
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let queue = EmailQueue::restore(
            QueueConfig {
                snapshot_path: Some(path),
                ..config()
            },
            FlakyTransport::failing(0),
        )
        .await;

        assert!(queue.jobs().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_on_shutdown() {
        let transport = FlakyTransport::failing(0);
        let queue = EmailQueue::new(config(), transport.clone());
        queue.enqueue(email("a@x.dev"), 1).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = queue.spawn_worker(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();

        assert_eq!(*transport.sent.lock().await, vec!["a@x.dev"]);
    }
}
