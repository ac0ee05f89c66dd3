//! Scan job queue
//!
//! The queue is the only cross-worker coordination primitive: workers pull
//! jobs from it and never communicate directly. Retry scheduling uses
//! exponential backoff with a cap; jobs that exhaust their attempts are
//! dead-lettered.

use async_trait::async_trait;
use mailguard_common::config::QueueConfig;
use mailguard_common::types::{Attachment, Direction, JobId, MailMessage, MessageId};
use mailguard_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A queued unit of scanning work for one message.
///
/// Carries the raw content slices the checks need so providers never load
/// the message themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub message_id: MessageId,
    pub direction: Direction,
    pub sender: String,
    pub sender_ip: Option<IpAddr>,
    pub headers: HashMap<String, String>,
    /// Distinct URLs extracted from the message body, in order of first
    /// appearance
    pub urls: Vec<String>,
    pub attachments: Vec<Attachment>,
    /// Completed delivery attempts
    pub attempt: u32,
}

impl ScanJob {
    /// Build a job from a message entering the pipeline
    pub fn from_message(message: &MailMessage) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id: message.id,
            direction: message.direction,
            sender: message.from.clone(),
            sender_ip: message.sender_ip,
            headers: message.headers.clone(),
            urls: extract_urls(&message.body),
            attachments: message.attachments.clone(),
            attempt: 0,
        }
    }
}

static URL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Extract distinct URLs from a message body, preserving first-appearance
/// order
pub fn extract_urls(body: &str) -> Vec<String> {
    let pattern = URL_PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("URL pattern is valid")
    });

    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for m in pattern.find_iter(body) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
        if seen.insert(url.to_string()) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// Durable work queue contract feeding scan jobs to the workers
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate processing
    async fn enqueue(&self, job: ScanJob) -> Result<()>;

    /// Pull the next job; `None` when the queue has shut down
    async fn dequeue(&self) -> Option<ScanJob>;

    /// Re-enqueue a failed job after its backoff delay, incrementing the
    /// attempt counter
    async fn requeue_with_backoff(&self, job: ScanJob) -> Result<()>;

    /// Park a job that exhausted its attempts
    async fn dead_letter(&self, job: ScanJob) -> Result<()>;
}

/// Exponential backoff with a cap: base * 2^attempt
pub fn calculate_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(cap)
}

/// Channel-backed in-memory job queue.
///
/// Delayed requeues are scheduled as sleeping tasks; the channel itself only
/// ever holds due jobs.
pub struct MemoryJobQueue {
    tx: mpsc::Sender<ScanJob>,
    rx: Mutex<mpsc::Receiver<ScanJob>>,
    dead: Mutex<Vec<ScanJob>>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl MemoryJobQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            dead: Mutex::new(Vec::new()),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_cap: Duration::from_secs(config.backoff_cap_secs),
        }
    }

    /// Jobs parked on the dead-letter list
    pub async fn dead_letters(&self) -> Vec<ScanJob> {
        self.dead.lock().await.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: ScanJob) -> Result<()> {
        debug!(job_id = %job.id, message_id = %job.message_id, "Enqueueing scan job");
        self.tx
            .send(job)
            .await
            .map_err(|e| Error::Infrastructure(format!("queue closed: {}", e)))
    }

    async fn dequeue(&self) -> Option<ScanJob> {
        self.rx.lock().await.recv().await
    }

    async fn requeue_with_backoff(&self, mut job: ScanJob) -> Result<()> {
        job.attempt += 1;
        let delay = calculate_backoff(job.attempt, self.backoff_base, self.backoff_cap);
        info!(
            job_id = %job.id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling scan job retry"
        );

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(job).await {
                warn!("Dropping retried job, queue closed: {}", e);
            }
        });

        Ok(())
    }

    async fn dead_letter(&self, job: ScanJob) -> Result<()> {
        warn!(
            job_id = %job.id,
            message_id = %job.message_id,
            attempts = job.attempt,
            "Dead-lettering scan job"
        );
        self.dead.lock().await.push(job);
        Ok(())
    }
}
