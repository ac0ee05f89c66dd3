//! Configuration for MailGuard

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scan pipeline configuration
    #[serde(default)]
    pub scan: ScanConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Check provider configuration
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; when absent the in-memory store is used
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// Scan pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of parallel scan workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Authentication check timeout in seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// URL check timeout in seconds, per batch
    #[serde(default = "default_url_timeout")]
    pub url_timeout_secs: u64,

    /// Attachment check timeout in seconds, per file
    #[serde(default = "default_attachment_timeout")]
    pub attachment_timeout_secs: u64,

    /// Score weights for the verdict aggregator
    #[serde(default)]
    pub weights: ScoreWeights,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            auth_timeout_secs: default_auth_timeout(),
            url_timeout_secs: default_url_timeout(),
            attachment_timeout_secs: default_attachment_timeout(),
            weights: ScoreWeights::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_url_timeout() -> u64 {
    8
}

fn default_attachment_timeout() -> u64 {
    15
}

/// Weights for the aggregator's danger score.
///
/// All weights must be non-negative: the aggregator's monotonicity guarantee
/// relies on strictly worse verdicts only ever adding to the score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Per failed authentication mechanism (SPF, DKIM, DMARC)
    #[serde(default = "default_auth_fail_weight")]
    pub auth_fail: f64,

    /// Per suspicious URL
    #[serde(default = "default_url_suspicious_weight")]
    pub url_suspicious: f64,

    /// Per malicious or phishing URL
    #[serde(default = "default_url_malicious_weight")]
    pub url_malicious: f64,

    /// Per suspicious attachment
    #[serde(default = "default_attachment_suspicious_weight")]
    pub attachment_suspicious: f64,

    /// Per degraded check (timeout, provider error)
    #[serde(default = "default_degraded_weight")]
    pub degraded: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            auth_fail: default_auth_fail_weight(),
            url_suspicious: default_url_suspicious_weight(),
            url_malicious: default_url_malicious_weight(),
            attachment_suspicious: default_attachment_suspicious_weight(),
            degraded: default_degraded_weight(),
        }
    }
}

fn default_auth_fail_weight() -> f64 {
    0.2
}

fn default_url_suspicious_weight() -> f64 {
    0.35
}

fn default_url_malicious_weight() -> f64 {
    0.75
}

fn default_attachment_suspicious_weight() -> f64 {
    0.7
}

fn default_degraded_weight() -> f64 {
    0.3
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum delivery attempts per scan job before dead-lettering
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in seconds; doubles per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Backoff cap in seconds
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,

    /// Channel capacity of the in-memory queue
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            capacity: default_queue_capacity(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    2
}

fn default_backoff_cap() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    1024
}

/// Check provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Enable the DNS posture authentication provider
    #[serde(default)]
    pub enable_dns_posture: bool,

    /// Remote URL reputation endpoint; disabled when absent
    pub reputation_endpoint: Option<String>,

    /// Reputation lookup timeout in milliseconds
    #[serde(default = "default_reputation_timeout")]
    pub reputation_timeout_ms: u64,

    /// Domains whose URLs are always treated as malicious
    #[serde(default)]
    pub url_blocklist: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enable_dns_posture: false,
            reputation_endpoint: None,
            reputation_timeout_ms: default_reputation_timeout(),
            url_blocklist: Vec::new(),
        }
    }
}

fn default_reputation_timeout() -> u64 {
    5000
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter, EnvFilter syntax
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info,mailguard=debug".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations, falling back to defaults
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./mailguard.toml"),
            std::path::PathBuf::from("/etc/mailguard/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan.workers == 0 {
            return Err(crate::Error::Config(
                "scan.workers must be at least 1".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(crate::Error::Config(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        let w = &self.scan.weights;
        for (name, value) in [
            ("auth_fail", w.auth_fail),
            ("url_suspicious", w.url_suspicious),
            ("url_malicious", w.url_malicious),
            ("attachment_suspicious", w.attachment_suspicious),
            ("degraded", w.degraded),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(crate::Error::Config(format!(
                    "scan.weights.{} must be a non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}
