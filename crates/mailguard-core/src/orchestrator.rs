//! Scan orchestrator
//!
//! Fans a scan job out to every applicable check provider, enforces
//! per-category timeouts, collects partial results even when providers fail,
//! and aggregates the verdicts into a security report. One category's
//! failure never prevents another from completing or being recorded.

use crate::aggregate::aggregate;
use crate::checks::{
    combine_attachment_results, combine_url_results, CheckCategory, CheckInput, CheckOutput,
    CheckProvider, CheckRegistry,
};
use crate::queue::ScanJob;
use mailguard_common::config::{ScanConfig, ScoreWeights};
use mailguard_common::report::{
    AttachmentScanEntry, AuthCheckResult, SecurityReport, UrlScanEntry,
};
use mailguard_common::types::Direction;
use mailguard_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-category execution budgets
#[derive(Debug, Clone, Copy)]
pub struct ScanTimeouts {
    pub auth: Duration,
    /// Budget for one URL batch
    pub url: Duration,
    /// Budget per attachment file
    pub attachment_per_file: Duration,
}

impl ScanTimeouts {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            auth: Duration::from_secs(config.auth_timeout_secs),
            url: Duration::from_secs(config.url_timeout_secs),
            attachment_per_file: Duration::from_secs(config.attachment_timeout_secs),
        }
    }
}

/// Schedules check providers for one job and assembles the report.
///
/// Re-running the same job is safe: checks are deterministic functions of
/// the job content and the report overwrites any prior one.
pub struct ScanOrchestrator {
    registry: Arc<CheckRegistry>,
    timeouts: ScanTimeouts,
    weights: ScoreWeights,
}

impl ScanOrchestrator {
    pub fn new(registry: Arc<CheckRegistry>, timeouts: ScanTimeouts, weights: ScoreWeights) -> Self {
        Self {
            registry,
            timeouts,
            weights,
        }
    }

    /// Run all applicable checks for the job and aggregate the results
    pub async fn scan(&self, job: &ScanJob) -> Result<SecurityReport> {
        // Authentication applies to inbound mail only; outbound mail comes
        // from an already-authenticated local user
        let auth_task = if job.direction == Direction::Inbound {
            let providers = self.registry.for_category(CheckCategory::Authentication);
            if providers.is_empty() {
                None
            } else {
                let input = CheckInput::Auth {
                    headers: job.headers.clone(),
                    sender: job.sender.clone(),
                    sender_ip: job.sender_ip,
                    direction: job.direction,
                };
                Some(self.spawn_auth(providers, input))
            }
        } else {
            None
        };

        let url_task = if job.urls.is_empty() {
            None
        } else {
            let providers = self.registry.for_category(CheckCategory::UrlReputation);
            if providers.is_empty() {
                None
            } else {
                let input = CheckInput::Urls {
                    urls: job.urls.clone(),
                };
                Some(self.spawn_urls(providers, input, job.urls.clone()))
            }
        };

        let attachment_task = if job.attachments.is_empty() {
            None
        } else {
            let providers = self.registry.for_category(CheckCategory::AttachmentScan);
            if providers.is_empty() {
                None
            } else {
                let input = CheckInput::Attachments {
                    files: job.attachments.clone(),
                };
                let filenames: Vec<String> =
                    job.attachments.iter().map(|a| a.filename.clone()).collect();
                Some(self.spawn_attachments(providers, input, filenames))
            }
        };

        // Fan in: each category task already absorbed its own timeouts and
        // provider failures, so these joins cannot block indefinitely
        let auth = match auth_task {
            Some(handle) => Some(join_category(handle, || {
                AuthCheckResult::degraded("check task failed")
            })
            .await),
            None => None,
        };
        let urls = match url_task {
            Some(handle) => join_category(handle, Vec::new).await,
            None => Vec::new(),
        };
        let attachments = match attachment_task {
            Some(handle) => join_category(handle, Vec::new).await,
            None => Vec::new(),
        };

        let (disposition, score) =
            aggregate(auth.as_ref(), &urls, &attachments, &self.weights)?;

        debug!(
            message_id = %job.message_id,
            disposition = %disposition,
            score,
            "Scan completed"
        );

        Ok(SecurityReport {
            auth,
            urls,
            attachments,
            disposition,
            score,
            scanned_at: chrono::Utc::now(),
        })
    }

    fn spawn_auth(
        &self,
        providers: Vec<Arc<dyn CheckProvider>>,
        input: CheckInput,
    ) -> JoinHandle<AuthCheckResult> {
        let budget = self.timeouts.auth;
        tokio::spawn(async move {
            let mut handles = Vec::new();
            for provider in providers {
                let input = input.clone();
                handles.push(tokio::spawn(async move {
                    let name = provider.name().to_string();
                    match tokio::time::timeout(budget, provider.evaluate(&input)).await {
                        Ok(Ok(CheckOutput::Auth(result))) => result,
                        Ok(Ok(_)) => {
                            warn!(provider = %name, "Provider returned wrong output category");
                            AuthCheckResult::degraded("wrong output category")
                        }
                        Ok(Err(e)) => {
                            warn!(provider = %name, "Authentication check degraded: {}", e);
                            AuthCheckResult::degraded(e.to_string())
                        }
                        Err(_) => {
                            warn!(provider = %name, "Authentication check timed out");
                            AuthCheckResult::degraded("timed out")
                        }
                    }
                }));
            }

            let mut combined: Option<AuthCheckResult> = None;
            for handle in handles {
                let result = handle
                    .await
                    .unwrap_or_else(|_| AuthCheckResult::degraded("provider panicked"));
                combined = Some(match combined {
                    Some(prev) => prev.merge_worst(result),
                    None => result,
                });
            }
            combined.unwrap_or_else(|| AuthCheckResult::degraded("no provider result"))
        })
    }

    fn spawn_urls(
        &self,
        providers: Vec<Arc<dyn CheckProvider>>,
        input: CheckInput,
        urls: Vec<String>,
    ) -> JoinHandle<Vec<UrlScanEntry>> {
        let budget = self.timeouts.url;
        tokio::spawn(async move {
            let mut handles = Vec::new();
            for provider in providers {
                let input = input.clone();
                let urls = urls.clone();
                handles.push(tokio::spawn(async move {
                    let name = provider.name().to_string();
                    match tokio::time::timeout(budget, provider.evaluate(&input)).await {
                        Ok(Ok(CheckOutput::Urls(entries))) => entries,
                        Ok(Ok(_)) => {
                            warn!(provider = %name, "Provider returned wrong output category");
                            urls.iter().map(UrlScanEntry::unknown).collect()
                        }
                        Ok(Err(e)) => {
                            warn!(provider = %name, "URL check degraded: {}", e);
                            urls.iter().map(UrlScanEntry::unknown).collect()
                        }
                        Err(_) => {
                            warn!(provider = %name, "URL check timed out");
                            urls.iter().map(UrlScanEntry::unknown).collect()
                        }
                    }
                }));
            }

            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await.unwrap_or_default());
            }
            combine_url_results(results)
        })
    }

    fn spawn_attachments(
        &self,
        providers: Vec<Arc<dyn CheckProvider>>,
        input: CheckInput,
        filenames: Vec<String>,
    ) -> JoinHandle<Vec<AttachmentScanEntry>> {
        // Budget scales with the number of files in the batch
        let budget = self
            .timeouts
            .attachment_per_file
            .saturating_mul(filenames.len().max(1) as u32);
        tokio::spawn(async move {
            let mut handles = Vec::new();
            for provider in providers {
                let input = input.clone();
                let filenames = filenames.clone();
                handles.push(tokio::spawn(async move {
                    let name = provider.name().to_string();
                    match tokio::time::timeout(budget, provider.evaluate(&input)).await {
                        Ok(Ok(CheckOutput::Attachments(entries))) => entries,
                        Ok(Ok(_)) => {
                            warn!(provider = %name, "Provider returned wrong output category");
                            filenames
                                .iter()
                                .map(|f| AttachmentScanEntry::temp_error(f, "wrong output category"))
                                .collect()
                        }
                        Ok(Err(e)) => {
                            warn!(provider = %name, "Attachment check degraded: {}", e);
                            filenames
                                .iter()
                                .map(|f| AttachmentScanEntry::temp_error(f, e.to_string()))
                                .collect()
                        }
                        Err(_) => {
                            warn!(provider = %name, "Attachment check timed out");
                            filenames
                                .iter()
                                .map(|f| AttachmentScanEntry::temp_error(f, "timed out"))
                                .collect()
                        }
                    }
                }));
            }

            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await.unwrap_or_default());
            }
            combine_attachment_results(results)
        })
    }
}

/// Join a category task, substituting a degraded default if the task itself
/// failed
async fn join_category<T>(handle: JoinHandle<T>, fallback: impl FnOnce() -> T) -> T {
    handle.await.unwrap_or_else(|e| {
        warn!("Category task failed: {}", e);
        fallback()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{
        CheckError, HeuristicUrlProvider, SignatureAttachmentProvider, StaticAuthProvider,
    };
    use async_trait::async_trait;
    use mailguard_common::config::ScanConfig;
    use mailguard_common::report::{
        AttachmentStatus, AuthVerdict, DkimOutcome, DmarcOutcome, SpfOutcome,
    };
    use mailguard_common::types::{Attachment, Disposition};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct SlowAttachmentProvider;

    #[async_trait]
    impl CheckProvider for SlowAttachmentProvider {
        fn name(&self) -> &str {
            "slow-attachment"
        }

        fn category(&self) -> CheckCategory {
            CheckCategory::AttachmentScan
        }

        async fn evaluate(
            &self,
            _input: &CheckInput,
        ) -> std::result::Result<CheckOutput, CheckError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(CheckOutput::Attachments(Vec::new()))
        }
    }

    struct FailingUrlProvider;

    #[async_trait]
    impl CheckProvider for FailingUrlProvider {
        fn name(&self) -> &str {
            "failing-url"
        }

        fn category(&self) -> CheckCategory {
            CheckCategory::UrlReputation
        }

        async fn evaluate(
            &self,
            _input: &CheckInput,
        ) -> std::result::Result<CheckOutput, CheckError> {
            Err(CheckError::Provider("upstream unreachable".to_string()))
        }
    }

    fn failing_auth() -> StaticAuthProvider {
        StaticAuthProvider::new(AuthCheckResult {
            spf: SpfOutcome {
                result: AuthVerdict::Fail,
                detail: "not authorized".to_string(),
            },
            dkim: DkimOutcome {
                result: AuthVerdict::Fail,
                selector: None,
                domain: None,
            },
            dmarc: DmarcOutcome {
                result: AuthVerdict::Fail,
                policy: None,
                alignment: false,
            },
        })
    }

    fn job(direction: Direction, urls: Vec<&str>, attachments: Vec<Attachment>) -> ScanJob {
        ScanJob {
            id: Uuid::now_v7(),
            message_id: Uuid::now_v7(),
            direction,
            sender: "sender@example.com".to_string(),
            sender_ip: None,
            headers: HashMap::new(),
            urls: urls.into_iter().map(String::from).collect(),
            attachments,
            attempt: 0,
        }
    }

    fn orchestrator(registry: CheckRegistry) -> ScanOrchestrator {
        ScanOrchestrator::new(
            Arc::new(registry),
            ScanTimeouts::from_config(&ScanConfig::default()),
            ScoreWeights::default(),
        )
    }

    #[tokio::test]
    async fn test_clean_inbound_message_delivers() {
        // Scenario A
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(StaticAuthProvider::all_pass()));
        let orchestrator = orchestrator(registry);

        let report = orchestrator
            .scan(&job(Direction::Inbound, vec![], vec![]))
            .await
            .unwrap();
        assert_eq!(report.disposition, Disposition::Delivered);
        assert!(report.score < 0.3);
        assert!(report.auth.as_ref().unwrap().all_pass());
        assert!(report.urls.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_with_phishing_url_quarantines() {
        // Scenario B
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(failing_auth()));
        registry.register(Arc::new(HeuristicUrlProvider::new(vec![])));
        let orchestrator = orchestrator(registry);

        let report = orchestrator
            .scan(&job(
                Direction::Inbound,
                vec!["https://xn--pypal-4ve.example/login/verify"],
                vec![],
            ))
            .await
            .unwrap();
        assert_eq!(report.disposition, Disposition::Quarantined);
        assert!(report.score >= 0.7);
    }

    #[tokio::test]
    async fn test_outbound_skips_authentication() {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(failing_auth()));
        let orchestrator = orchestrator(registry);

        let report = orchestrator
            .scan(&job(Direction::Outbound, vec![], vec![]))
            .await
            .unwrap();
        assert!(report.auth.is_none());
        assert_eq!(report.disposition, Disposition::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attachment_check_degrades_to_warning() {
        // Scenario D: one attachment provider times out, everything else
        // passes; the category is recorded as temperror, not dropped
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(StaticAuthProvider::all_pass()));
        registry.register(Arc::new(SlowAttachmentProvider));
        let orchestrator = orchestrator(registry);

        let report = orchestrator
            .scan(&job(
                Direction::Inbound,
                vec![],
                vec![Attachment {
                    filename: "data.bin".to_string(),
                    content_type: "application/octet-stream".to_string(),
                    content: vec![0u8; 16],
                }],
            ))
            .await
            .unwrap();
        assert_eq!(report.attachments.len(), 1);
        assert_eq!(report.attachments[0].status, AttachmentStatus::TempError);
        assert_eq!(report.disposition, Disposition::DeliveredWithWarning);
    }

    #[tokio::test]
    async fn test_failed_url_provider_does_not_block_other_categories() {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(StaticAuthProvider::all_pass()));
        registry.register(Arc::new(FailingUrlProvider));
        registry.register(Arc::new(SignatureAttachmentProvider));
        let orchestrator = orchestrator(registry);

        let report = orchestrator
            .scan(&job(
                Direction::Inbound,
                vec!["https://example.com/a"],
                vec![Attachment {
                    filename: "report.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    content: b"%PDF-1.7".to_vec(),
                }],
            ))
            .await
            .unwrap();

        // Auth and attachment results are still recorded
        assert!(report.auth.as_ref().unwrap().all_pass());
        assert_eq!(report.attachments[0].status, AttachmentStatus::Clean);
        // The errored URL check is conservative, never a silent pass
        assert_eq!(
            report.urls[0].verdict,
            mailguard_common::report::UrlVerdict::Unknown
        );
        assert_eq!(report.disposition, Disposition::DeliveredWithWarning);
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(failing_auth()));
        registry.register(Arc::new(HeuristicUrlProvider::new(vec![])));
        registry.register(Arc::new(SignatureAttachmentProvider));
        let orchestrator = orchestrator(registry);

        let job = job(
            Direction::Inbound,
            vec!["https://bit.ly/x"],
            vec![Attachment {
                filename: "setup.exe".to_string(),
                content_type: "application/octet-stream".to_string(),
                content: b"MZ\x90\x00".to_vec(),
            }],
        );

        let first = orchestrator.scan(&job).await.unwrap();
        let second = orchestrator.scan(&job).await.unwrap();
        assert_eq!(first.disposition, second.disposition);
        assert_eq!(first.score, second.score);
        assert_eq!(first.auth, second.auth);
        assert_eq!(first.urls, second.urls);
        assert_eq!(first.attachments, second.attachments);
    }
}
