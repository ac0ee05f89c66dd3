//! Security report types
//!
//! The per-message aggregate of check outputs. The overall disposition and
//! score are always derived by the verdict aggregator from the constituent
//! results, never mutated independently.

use crate::types::{Disposition, Timestamp};
use serde::{Deserialize, Serialize};

/// Result code for a single authentication mechanism (SPF, DKIM, or DMARC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthVerdict {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    /// No record published / mechanism not attempted
    None,
    /// Transient failure (DNS timeout, provider error)
    TempError,
    /// Permanent failure (malformed record)
    PermError,
}

impl AuthVerdict {
    /// Severity rank used for worst-verdict-wins combination.
    /// Higher is worse; `Fail` outranks errors because it is a definite
    /// negative result rather than an unknown.
    pub fn severity(&self) -> u8 {
        match self {
            AuthVerdict::Pass => 0,
            AuthVerdict::None => 1,
            AuthVerdict::Neutral => 1,
            AuthVerdict::SoftFail => 2,
            AuthVerdict::TempError => 3,
            AuthVerdict::PermError => 4,
            AuthVerdict::Fail => 5,
        }
    }

    /// A definite authentication failure (counts toward the aggregation
    /// failure rules)
    pub fn is_fail(&self) -> bool {
        matches!(self, AuthVerdict::Fail)
    }

    /// A degraded result that must not silently count as pass
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuthVerdict::TempError | AuthVerdict::PermError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthVerdict::Pass => "pass",
            AuthVerdict::Fail => "fail",
            AuthVerdict::SoftFail => "softfail",
            AuthVerdict::Neutral => "neutral",
            AuthVerdict::None => "none",
            AuthVerdict::TempError => "temperror",
            AuthVerdict::PermError => "permerror",
        }
    }

    /// The worse of two verdicts
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for AuthVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DMARC policy published by the sender domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmarcPolicy {
    None,
    Quarantine,
    Reject,
}

/// SPF outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpfOutcome {
    pub result: AuthVerdict,
    pub detail: String,
}

/// DKIM outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkimOutcome {
    pub result: AuthVerdict,
    pub selector: Option<String>,
    pub domain: Option<String>,
}

/// DMARC outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmarcOutcome {
    pub result: AuthVerdict,
    pub policy: Option<DmarcPolicy>,
    pub alignment: bool,
}

/// Combined sender-authentication result for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCheckResult {
    pub spf: SpfOutcome,
    pub dkim: DkimOutcome,
    pub dmarc: DmarcOutcome,
}

impl AuthCheckResult {
    /// All three mechanisms passed
    pub fn all_pass(&self) -> bool {
        self.spf.result == AuthVerdict::Pass
            && self.dkim.result == AuthVerdict::Pass
            && self.dmarc.result == AuthVerdict::Pass
    }

    /// Number of mechanisms with a definite failure
    pub fn fail_count(&self) -> usize {
        [self.spf.result, self.dkim.result, self.dmarc.result]
            .iter()
            .filter(|v| v.is_fail())
            .count()
    }

    /// Any mechanism degraded to temperror/permerror
    pub fn any_degraded(&self) -> bool {
        [self.spf.result, self.dkim.result, self.dmarc.result]
            .iter()
            .any(|v| v.is_degraded())
    }

    /// Result for a check that could not run, recorded as temperror rather
    /// than silently counting as pass
    pub fn degraded(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            spf: SpfOutcome {
                result: AuthVerdict::TempError,
                detail: detail.clone(),
            },
            dkim: DkimOutcome {
                result: AuthVerdict::TempError,
                selector: None,
                domain: None,
            },
            dmarc: DmarcOutcome {
                result: AuthVerdict::TempError,
                policy: None,
                alignment: false,
            },
        }
    }

    /// Merge with another provider's result, keeping the worst verdict per
    /// mechanism
    pub fn merge_worst(self, other: Self) -> Self {
        let spf = if other.spf.result.severity() > self.spf.result.severity() {
            other.spf
        } else {
            self.spf
        };
        let dkim = if other.dkim.result.severity() > self.dkim.result.severity() {
            other.dkim
        } else {
            self.dkim
        };
        let dmarc = if other.dmarc.result.severity() > self.dmarc.result.severity() {
            other.dmarc
        } else {
            self.dmarc
        };
        Self { spf, dkim, dmarc }
    }
}

/// Verdict for one scanned URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlVerdict {
    Safe,
    /// Could not be evaluated; treated conservatively, never as safe
    Unknown,
    Suspicious,
    Phishing,
    Malicious,
}

impl UrlVerdict {
    pub fn severity(&self) -> u8 {
        match self {
            UrlVerdict::Safe => 0,
            UrlVerdict::Unknown => 1,
            UrlVerdict::Suspicious => 2,
            UrlVerdict::Phishing => 3,
            UrlVerdict::Malicious => 4,
        }
    }

    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Threat indicators for a scanned URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlThreatFlags {
    pub phishing: bool,
    pub malware: bool,
    pub spam: bool,
    pub suspicious_tld: bool,
    pub url_shortener: bool,
    pub punycode: bool,
}

/// Scan result for one distinct URL found in the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlScanEntry {
    pub url: String,
    pub domain: String,
    pub verdict: UrlVerdict,
    /// Reputation score, 0.0 (worst) to 1.0 (best)
    pub reputation: f64,
    #[serde(default)]
    pub threats: UrlThreatFlags,
}

impl UrlScanEntry {
    /// Entry for a URL that could not be evaluated
    pub fn unknown(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            domain: String::new(),
            verdict: UrlVerdict::Unknown,
            reputation: 0.0,
            threats: UrlThreatFlags::default(),
        }
    }
}

/// Status of one scanned attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Clean,
    /// Scan timed out or the provider degraded
    TempError,
    Suspicious,
    Malicious,
}

impl AttachmentStatus {
    pub fn severity(&self) -> u8 {
        match self {
            AttachmentStatus::Clean => 0,
            AttachmentStatus::TempError => 1,
            AttachmentStatus::Suspicious => 2,
            AttachmentStatus::Malicious => 3,
        }
    }

    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Scan result for one attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentScanEntry {
    pub filename: String,
    pub status: AttachmentStatus,
    #[serde(default)]
    pub threats: Vec<String>,
    pub detail: Option<String>,
}

impl AttachmentScanEntry {
    /// Entry for an attachment whose scan degraded
    pub fn temp_error(filename: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: AttachmentStatus::TempError,
            threats: Vec::new(),
            detail: Some(detail.into()),
        }
    }
}

/// Per-message aggregate of all check outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    /// Sender authentication result; absent when the category did not apply
    /// (authenticated local outbound mail)
    pub auth: Option<AuthCheckResult>,
    /// One entry per distinct URL found in the message
    #[serde(default)]
    pub urls: Vec<UrlScanEntry>,
    /// One entry per attachment
    #[serde(default)]
    pub attachments: Vec<AttachmentScanEntry>,
    /// Derived overall disposition
    pub disposition: Disposition,
    /// Danger score, 0.0 to 1.0, higher is more dangerous
    pub score: f64,
    pub scanned_at: Timestamp,
}
