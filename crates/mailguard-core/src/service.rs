//! Scan service facade
//!
//! Ties the pipeline together: accepts messages, persists the pending
//! record, enqueues the scan job, and runs the worker pool that drains the
//! queue. Retry and dead-letter policy lives here; the orchestrator and
//! lifecycle manager stay policy-free.

use crate::lifecycle::LifecycleManager;
use crate::orchestrator::ScanOrchestrator;
use crate::queue::{JobQueue, ScanJob};
use mailguard_common::report::SecurityReport;
use mailguard_common::types::{JobId, MailMessage, MessageId, MessageStatus};
use mailguard_common::{Error, Result};
use mailguard_storage::{MessageRecord, MessageStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ScanService {
    store: Arc<dyn MessageStore>,
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<ScanOrchestrator>,
    lifecycle: Arc<LifecycleManager>,
    max_attempts: u32,
}

impl ScanService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<ScanOrchestrator>,
        max_attempts: u32,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(store.clone()));
        Self {
            store,
            queue,
            orchestrator,
            lifecycle,
            max_attempts,
        }
    }

    /// Accept a message into the pipeline: persist it as `pending` and
    /// enqueue its scan job. Returns the job id.
    ///
    /// If the job cannot be enqueued the just-created record is moved to
    /// `failed` so it never sits in `pending` with no job to resolve it.
    pub async fn submit_for_scan(&self, message: &MailMessage) -> Result<JobId> {
        message.validate()?;
        let record = MessageRecord::from_message(message)?;
        self.store.create(&record).await?;

        let job = ScanJob::from_message(message);
        let job_id = job.id;
        if let Err(e) = self.queue.enqueue(job).await {
            error!(message_id = %message.id, "Failed to enqueue scan job: {}", e);
            if let Err(mark_err) = self.lifecycle.mark_failed(message.id, "enqueue").await {
                error!(message_id = %message.id, "Failed to mark message failed: {}", mark_err);
            }
            return Err(e);
        }

        info!(message_id = %message.id, job_id = %job_id, "Message accepted for scanning");
        Ok(job_id)
    }

    pub async fn status(&self, id: MessageId) -> Result<Option<MessageStatus>> {
        self.store.status(id).await
    }

    pub async fn security_report(&self, id: MessageId) -> Result<Option<SecurityReport>> {
        self.store.security_report(id).await
    }

    /// Admin release of a quarantined message
    pub async fn allow(&self, id: MessageId, actor: &str) -> Result<()> {
        self.lifecycle.allow(id, actor).await
    }

    /// Admin rejection of a quarantined message
    pub async fn block(&self, id: MessageId, actor: &str) -> Result<()> {
        self.lifecycle.block(id, actor).await
    }

    /// User deletion of a message
    pub async fn delete(&self, id: MessageId, actor: &str) -> Result<()> {
        self.lifecycle.delete(id, actor).await
    }

    /// Start `count` workers draining the queue until the token is
    /// cancelled or the queue closes
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let service = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    service.worker_loop(worker, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "Scan worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(worker, "Scan worker shutting down");
                    break;
                }
                job = self.queue.dequeue() => {
                    match job {
                        Some(job) => self.process_job(job).await,
                        None => {
                            debug!(worker, "Queue closed, scan worker exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Process one job: scan, then record the result. Failures either retry
    /// with backoff or, once attempts are exhausted or the error is not
    /// retryable, mark the message failed and dead-letter the job.
    async fn process_job(&self, job: ScanJob) {
        let outcome = self.scan_and_record(&job).await;
        match outcome {
            Ok(status) => {
                debug!(job_id = %job.id, status = %status, "Scan job completed");
            }
            Err(Error::TransitionConflict { actual, .. }) => {
                // Another actor already settled the message; the job is done
                debug!(job_id = %job.id, actual = %actual, "Dropping scan job, message already settled");
            }
            Err(e) if e.is_retryable() && job.attempt + 1 < self.max_attempts => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt + 1,
                    "Scan job failed, will retry: {}",
                    e
                );
                if let Err(e) = self.queue.requeue_with_backoff(job).await {
                    error!("Failed to requeue scan job: {}", e);
                }
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    message_id = %job.message_id,
                    attempts = job.attempt + 1,
                    "Scan job failed permanently: {}",
                    e
                );
                if let Err(e) = self.lifecycle.mark_failed(job.message_id, &e.code().to_lowercase()).await {
                    error!(message_id = %job.message_id, "Failed to mark message failed: {}", e);
                }
                if let Err(e) = self.queue.dead_letter(job).await {
                    error!("Failed to dead-letter scan job: {}", e);
                }
            }
        }
    }

    async fn scan_and_record(&self, job: &ScanJob) -> Result<MessageStatus> {
        let report = self.orchestrator.scan(job).await?;
        self.lifecycle
            .apply_scan_result(job.message_id, &report)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckRegistry, HeuristicUrlProvider, StaticAuthProvider};
    use crate::orchestrator::ScanTimeouts;
    use crate::queue::MemoryJobQueue;
    use async_trait::async_trait;
    use chrono::Utc;
    use mailguard_common::config::{QueueConfig, ScanConfig, ScoreWeights};
    use mailguard_common::types::Direction;
    use mailguard_storage::{AuditLogEntry, CasOutcome, MemoryMessageStore};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn message(body: &str) -> MailMessage {
        MailMessage {
            id: Uuid::now_v7(),
            mailbox_id: Uuid::now_v7(),
            direction: Direction::Inbound,
            from: "sender@example.com".to_string(),
            to: vec!["user@mailguard.test".to_string()],
            subject: "Hello".to_string(),
            body: body.to_string(),
            headers: Default::default(),
            sender_ip: None,
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    fn service_with(
        store: Arc<dyn MessageStore>,
        queue: Arc<MemoryJobQueue>,
        max_attempts: u32,
    ) -> Arc<ScanService> {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(StaticAuthProvider::all_pass()));
        registry.register(Arc::new(HeuristicUrlProvider::new(vec![
            "evil.example".to_string(),
        ])));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            Arc::new(registry),
            ScanTimeouts::from_config(&ScanConfig::default()),
            ScoreWeights::default(),
        ));
        Arc::new(ScanService::new(store, queue, orchestrator, max_attempts))
    }

    async fn wait_for_status(
        service: &ScanService,
        id: MessageId,
        wanted: MessageStatus,
    ) -> MessageStatus {
        for _ in 0..2000 {
            if let Some(status) = service.status(id).await.unwrap() {
                if status == wanted {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.status(id).await.unwrap().unwrap_or(MessageStatus::Pending)
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_message() {
        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let service = service_with(store, queue, 5);

        let mut bad = message("hi");
        bad.to.clear();
        assert!(matches!(
            service.submit_for_scan(&bad).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_clean_message_delivers() {
        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let service = service_with(store, queue, 5);

        let msg = message("just saying hi");
        service.submit_for_scan(&msg).await.unwrap();
        assert_eq!(
            service.status(msg.id).await.unwrap(),
            Some(MessageStatus::Pending)
        );

        let shutdown = CancellationToken::new();
        let workers = service.spawn_workers(2, shutdown.clone());

        let status = wait_for_status(&service, msg.id, MessageStatus::ScannedDelivered).await;
        assert_eq!(status, MessageStatus::ScannedDelivered);

        let report = service.security_report(msg.id).await.unwrap().unwrap();
        assert!(report.score < 0.3);

        shutdown.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_end_to_end_malicious_url_quarantines_then_admin_blocks() {
        let store = Arc::new(MemoryMessageStore::new());
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let service = service_with(store, queue, 5);

        let msg = message("click https://evil.example/payload now");
        service.submit_for_scan(&msg).await.unwrap();

        let shutdown = CancellationToken::new();
        let workers = service.spawn_workers(1, shutdown.clone());

        let status = wait_for_status(&service, msg.id, MessageStatus::Quarantined).await;
        assert_eq!(status, MessageStatus::Quarantined);

        service.block(msg.id, "admin@mailguard.test").await.unwrap();
        assert_eq!(
            service.status(msg.id).await.unwrap(),
            Some(MessageStatus::Blocked)
        );

        shutdown.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }

    /// Queue that rejects every enqueue, as when the channel has shut down
    struct ClosedQueue;

    #[async_trait]
    impl JobQueue for ClosedQueue {
        async fn enqueue(&self, _job: ScanJob) -> Result<()> {
            Err(Error::Infrastructure("queue closed".to_string()))
        }

        async fn dequeue(&self) -> Option<ScanJob> {
            None
        }

        async fn requeue_with_backoff(&self, _job: ScanJob) -> Result<()> {
            Err(Error::Infrastructure("queue closed".to_string()))
        }

        async fn dead_letter(&self, _job: ScanJob) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_fails_message_instead_of_stranding_it() {
        let store = Arc::new(MemoryMessageStore::new());
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(StaticAuthProvider::all_pass()));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            Arc::new(registry),
            ScanTimeouts::from_config(&ScanConfig::default()),
            ScoreWeights::default(),
        ));
        let service = ScanService::new(store, Arc::new(ClosedQueue), orchestrator, 5);

        let msg = message("hello");
        let err = service.submit_for_scan(&msg).await.unwrap_err();
        assert!(matches!(err, Error::Infrastructure(_)));

        // The record is failed, not left pending with no job to resolve it
        assert_eq!(
            service.status(msg.id).await.unwrap(),
            Some(MessageStatus::Failed)
        );
    }

    /// Store whose status writes fail a fixed number of times before
    /// recovering, for exercising the retry path
    struct FlakyStore {
        inner: MemoryMessageStore,
        failures_left: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryMessageStore::new(),
                failures_left: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn create(&self, record: &MessageRecord) -> Result<()> {
            self.inner.create(record).await
        }

        async fn read(&self, id: MessageId) -> Result<Option<MessageRecord>> {
            self.inner.read(id).await
        }

        async fn compare_and_set_status(
            &self,
            id: MessageId,
            expected: MessageStatus,
            new: MessageStatus,
            report: Option<&SecurityReport>,
        ) -> Result<CasOutcome> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Database("connection reset".to_string()));
            }
            self.inner
                .compare_and_set_status(id, expected, new, report)
                .await
        }

        async fn list_by_status(
            &self,
            status: MessageStatus,
            limit: i64,
        ) -> Result<Vec<MessageRecord>> {
            self.inner.list_by_status(status, limit).await
        }

        async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
            self.inner.append_audit(entry).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_store_failure_retries_and_succeeds() {
        let store = Arc::new(FlakyStore::new(2));
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let service = service_with(store, queue.clone(), 5);

        let msg = message("hello");
        service.submit_for_scan(&msg).await.unwrap();

        let shutdown = CancellationToken::new();
        let workers = service.spawn_workers(1, shutdown.clone());

        let status = wait_for_status(&service, msg.id, MessageStatus::ScannedDelivered).await;
        assert_eq!(status, MessageStatus::ScannedDelivered);
        assert!(queue.dead_letters().await.is_empty());

        shutdown.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_dead_letter_and_fail_message() {
        // Store fails every status write, so the job burns through all
        // attempts and the failure mark itself is best-effort
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let service = service_with(store.clone(), queue.clone(), 3);

        let msg = message("hello");
        service.submit_for_scan(&msg).await.unwrap();

        let shutdown = CancellationToken::new();
        let workers = service.spawn_workers(1, shutdown.clone());

        for _ in 0..2000 {
            if !queue.dead_letters().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, msg.id);
        assert_eq!(dead[0].attempt, 2);

        shutdown.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }
}
