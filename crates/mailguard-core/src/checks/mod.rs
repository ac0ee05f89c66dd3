//! Check providers
//!
//! A check provider evaluates one security dimension for a message and
//! returns a typed verdict or a check-level error. Providers receive only
//! the slice of message data their category needs, never the whole message,
//! and must never let an internal failure escape as a panic or error out of
//! the pipeline: degradation is reported as a `CheckError` value so the
//! orchestrator can record it as `temperror`.

pub mod attachment;
pub mod auth;
pub mod url;

pub use attachment::{SignatureAttachmentProvider, StaticAttachmentProvider};
pub use auth::{DnsPostureProvider, HeaderAuthProvider, StaticAuthProvider};
pub use url::{HeuristicUrlProvider, RemoteReputationProvider};

use async_trait::async_trait;
use mailguard_common::report::{AttachmentScanEntry, AuthCheckResult, UrlScanEntry};
use mailguard_common::types::{Attachment, Direction};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

/// Security dimension a provider evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckCategory {
    Authentication,
    UrlReputation,
    AttachmentScan,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::Authentication => write!(f, "authentication"),
            CheckCategory::UrlReputation => write!(f, "url-reputation"),
            CheckCategory::AttachmentScan => write!(f, "attachment-scan"),
        }
    }
}

/// Non-fatal, per-provider failure. Captured as data by the orchestrator
/// and recorded as a degraded result, never propagated out of the pipeline.
#[derive(Debug, Clone, Error)]
pub enum CheckError {
    #[error("check timed out")]
    Timeout,
    #[error("provider failure: {0}")]
    Provider(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

/// Minimal per-category slice of message data handed to providers
#[derive(Debug, Clone)]
pub enum CheckInput {
    Auth {
        headers: HashMap<String, String>,
        sender: String,
        sender_ip: Option<IpAddr>,
        direction: Direction,
    },
    Urls {
        urls: Vec<String>,
    },
    Attachments {
        files: Vec<Attachment>,
    },
}

/// Typed verdict payload returned by a provider
#[derive(Debug, Clone)]
pub enum CheckOutput {
    Auth(AuthCheckResult),
    Urls(Vec<UrlScanEntry>),
    Attachments(Vec<AttachmentScanEntry>),
}

/// A pluggable security check.
///
/// Implementations must be safe to run concurrently with other checks: they
/// hold no mutable state shared with the rest of the pipeline.
#[async_trait]
pub trait CheckProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// The category this provider is registered under
    fn category(&self) -> CheckCategory;

    /// Evaluate the input and return a verdict or a check-level error
    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError>;
}

/// Registry of check providers, keyed by category.
///
/// More than one provider may exist per category; their results are combined
/// with worst-verdict-wins inside the category before aggregation.
#[derive(Default)]
pub struct CheckRegistry {
    providers: Vec<Arc<dyn CheckProvider>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    pub fn register(&mut self, provider: Arc<dyn CheckProvider>) {
        self.providers.push(provider);
    }

    /// All providers registered for a category
    pub fn for_category(&self, category: CheckCategory) -> Vec<Arc<dyn CheckProvider>> {
        self.providers
            .iter()
            .filter(|p| p.category() == category)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Combine URL results from multiple providers, keeping the worst verdict
/// and lowest reputation per URL
pub fn combine_url_results(results: Vec<Vec<UrlScanEntry>>) -> Vec<UrlScanEntry> {
    let mut by_url: HashMap<String, UrlScanEntry> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entries in results {
        for entry in entries {
            match by_url.get_mut(&entry.url) {
                Some(existing) => {
                    existing.verdict = existing.verdict.worst(entry.verdict);
                    if entry.reputation < existing.reputation {
                        existing.reputation = entry.reputation;
                    }
                    existing.threats.phishing |= entry.threats.phishing;
                    existing.threats.malware |= entry.threats.malware;
                    existing.threats.spam |= entry.threats.spam;
                    existing.threats.suspicious_tld |= entry.threats.suspicious_tld;
                    existing.threats.url_shortener |= entry.threats.url_shortener;
                    existing.threats.punycode |= entry.threats.punycode;
                    if existing.domain.is_empty() {
                        existing.domain = entry.domain;
                    }
                }
                None => {
                    order.push(entry.url.clone());
                    by_url.insert(entry.url.clone(), entry);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|url| by_url.remove(&url))
        .collect()
}

/// Combine attachment results from multiple providers, keeping the worst
/// status per filename and merging threat lists
pub fn combine_attachment_results(
    results: Vec<Vec<AttachmentScanEntry>>,
) -> Vec<AttachmentScanEntry> {
    let mut by_name: HashMap<String, AttachmentScanEntry> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entries in results {
        for entry in entries {
            match by_name.get_mut(&entry.filename) {
                Some(existing) => {
                    existing.status = existing.status.worst(entry.status);
                    for threat in entry.threats {
                        if !existing.threats.contains(&threat) {
                            existing.threats.push(threat);
                        }
                    }
                    if existing.detail.is_none() {
                        existing.detail = entry.detail;
                    }
                }
                None => {
                    order.push(entry.filename.clone());
                    by_name.insert(entry.filename.clone(), entry);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}
