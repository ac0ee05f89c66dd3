//! Sender authentication providers
//!
//! Actual SPF/DKIM/DMARC verification happens at the receiving MTA; the
//! providers here consume its `Authentication-Results` header and check the
//! sender domain's published DNS posture. Neither re-runs the RFC
//! verification algorithms.

use crate::checks::{CheckCategory, CheckError, CheckInput, CheckOutput, CheckProvider};
use async_trait::async_trait;
use mailguard_common::report::{
    AuthCheckResult, AuthVerdict, DkimOutcome, DmarcOutcome, DmarcPolicy, SpfOutcome,
};
use mailguard_common::types::EmailAddress;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Parses the `Authentication-Results` header stamped by the upstream MTA
pub struct HeaderAuthProvider;

#[async_trait]
impl CheckProvider for HeaderAuthProvider {
    fn name(&self) -> &str {
        "header-auth"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::Authentication
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let headers = match input {
            CheckInput::Auth { headers, .. } => headers,
            _ => {
                return Err(CheckError::MalformedInput(
                    "authentication provider requires auth input".to_string(),
                ))
            }
        };

        let header = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Authentication-Results"))
            .map(|(_, v)| v.as_str());

        let result = match header {
            Some(value) => parse_authentication_results(value),
            // No upstream verdict available; recorded as none, not as pass
            None => AuthCheckResult {
                spf: SpfOutcome {
                    result: AuthVerdict::None,
                    detail: "no Authentication-Results header".to_string(),
                },
                dkim: DkimOutcome {
                    result: AuthVerdict::None,
                    selector: None,
                    domain: None,
                },
                dmarc: DmarcOutcome {
                    result: AuthVerdict::None,
                    policy: None,
                    alignment: false,
                },
            },
        };

        Ok(CheckOutput::Auth(result))
    }
}

/// Parse an RFC 8601 Authentication-Results header value.
///
/// Only the spf/dkim/dmarc method results and a few well-known properties
/// (selector, signing domain, policy) are extracted.
fn parse_authentication_results(value: &str) -> AuthCheckResult {
    let mut spf = SpfOutcome {
        result: AuthVerdict::None,
        detail: String::new(),
    };
    let mut dkim = DkimOutcome {
        result: AuthVerdict::None,
        selector: None,
        domain: None,
    };
    let mut dmarc = DmarcOutcome {
        result: AuthVerdict::None,
        policy: None,
        alignment: false,
    };

    for clause in value.split(';').skip(1) {
        let clause = clause.trim();
        let mut tokens = clause.split_whitespace();
        let method = match tokens.next() {
            Some(m) => m,
            None => continue,
        };

        let (name, verdict_str) = match method.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let verdict = parse_verdict(verdict_str);

        match name.to_ascii_lowercase().as_str() {
            "spf" => {
                spf.result = verdict;
                spf.detail = clause.to_string();
            }
            "dkim" => {
                dkim.result = verdict;
                for token in tokens {
                    if let Some(selector) = token.strip_prefix("header.s=") {
                        dkim.selector = Some(selector.to_string());
                    } else if let Some(domain) = token.strip_prefix("header.d=") {
                        dkim.domain = Some(domain.to_string());
                    } else if let Some(identity) = token.strip_prefix("header.i=") {
                        dkim.domain = Some(identity.trim_start_matches('@').to_string());
                    }
                }
            }
            "dmarc" => {
                dmarc.result = verdict;
                dmarc.alignment = verdict == AuthVerdict::Pass;
                for token in tokens {
                    let token = token.trim_matches(|c| c == '(' || c == ')');
                    if let Some(policy) = token.strip_prefix("p=") {
                        dmarc.policy = parse_policy(policy);
                    }
                }
            }
            _ => {}
        }
    }

    AuthCheckResult { spf, dkim, dmarc }
}

fn parse_verdict(s: &str) -> AuthVerdict {
    match s.to_ascii_lowercase().as_str() {
        "pass" => AuthVerdict::Pass,
        "fail" => AuthVerdict::Fail,
        "softfail" => AuthVerdict::SoftFail,
        "neutral" => AuthVerdict::Neutral,
        "none" => AuthVerdict::None,
        "temperror" => AuthVerdict::TempError,
        "permerror" => AuthVerdict::PermError,
        // Unrecognized result codes are treated as a permanent parse error
        _ => AuthVerdict::PermError,
    }
}

fn parse_policy(s: &str) -> Option<DmarcPolicy> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Some(DmarcPolicy::None),
        "quarantine" => Some(DmarcPolicy::Quarantine),
        "reject" => Some(DmarcPolicy::Reject),
        _ => None,
    }
}

/// Checks what authentication policy the sender domain publishes in DNS.
///
/// A domain that publishes neither SPF nor DMARC records gives receivers
/// nothing to verify against; that posture is reported as `none` per
/// mechanism, DNS failures as `temperror`. This provider never produces
/// pass or fail on its own.
pub struct DnsPostureProvider {
    resolver: TokioAsyncResolver,
}

impl DnsPostureProvider {
    /// Create a provider with the system default resolver
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    async fn lookup_txt(&self, name: &str, prefix: &str) -> Result<Option<String>, CheckError> {
        use trust_dns_resolver::error::ResolveErrorKind;

        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => {
                for record in lookup.iter() {
                    let txt = record
                        .txt_data()
                        .iter()
                        .map(|d| String::from_utf8_lossy(d))
                        .collect::<String>();
                    if txt.starts_with(prefix) {
                        return Ok(Some(txt));
                    }
                }
                Ok(None)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
                _ => Err(CheckError::Provider(format!("DNS lookup failed: {}", e))),
            },
        }
    }
}

impl Default for DnsPostureProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckProvider for DnsPostureProvider {
    fn name(&self) -> &str {
        "dns-posture"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::Authentication
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let sender = match input {
            CheckInput::Auth { sender, .. } => sender,
            _ => {
                return Err(CheckError::MalformedInput(
                    "authentication provider requires auth input".to_string(),
                ))
            }
        };

        let domain = EmailAddress::parse(sender)
            .map(|a| a.domain)
            .ok_or_else(|| {
                CheckError::MalformedInput(format!("invalid sender address: {}", sender))
            })?;

        debug!(domain = %domain, "Checking published authentication posture");

        let spf_record = self.lookup_txt(&domain, "v=spf1").await;
        let dmarc_record = self
            .lookup_txt(&format!("_dmarc.{}", domain), "v=DMARC1")
            .await;

        let spf = match spf_record {
            Ok(Some(record)) => SpfOutcome {
                result: AuthVerdict::Neutral,
                detail: format!("SPF record published: {}", record),
            },
            Ok(None) => SpfOutcome {
                result: AuthVerdict::None,
                detail: "no SPF record published".to_string(),
            },
            Err(e) => SpfOutcome {
                result: AuthVerdict::TempError,
                detail: e.to_string(),
            },
        };

        let dmarc = match dmarc_record {
            Ok(Some(record)) => {
                let policy = record
                    .split(';')
                    .map(str::trim)
                    .find_map(|t| t.strip_prefix("p="))
                    .and_then(parse_policy);
                DmarcOutcome {
                    result: AuthVerdict::Neutral,
                    policy,
                    alignment: false,
                }
            }
            Ok(None) => DmarcOutcome {
                result: AuthVerdict::None,
                policy: None,
                alignment: false,
            },
            Err(_) => DmarcOutcome {
                result: AuthVerdict::TempError,
                policy: None,
                alignment: false,
            },
        };

        Ok(CheckOutput::Auth(AuthCheckResult {
            spf,
            // Posture lookups cannot evaluate message signatures
            dkim: DkimOutcome {
                result: AuthVerdict::None,
                selector: None,
                domain: Some(domain),
            },
            dmarc,
        }))
    }
}

/// Fixed-result provider used in tests and as a stand-in when no upstream
/// verdict source is configured
pub struct StaticAuthProvider {
    result: AuthCheckResult,
}

impl StaticAuthProvider {
    pub fn new(result: AuthCheckResult) -> Self {
        Self { result }
    }

    /// A provider that reports pass for all three mechanisms
    pub fn all_pass() -> Self {
        Self::new(AuthCheckResult {
            spf: SpfOutcome {
                result: AuthVerdict::Pass,
                detail: "static".to_string(),
            },
            dkim: DkimOutcome {
                result: AuthVerdict::Pass,
                selector: Some("default".to_string()),
                domain: None,
            },
            dmarc: DmarcOutcome {
                result: AuthVerdict::Pass,
                policy: Some(DmarcPolicy::None),
                alignment: true,
            },
        })
    }
}

#[async_trait]
impl CheckProvider for StaticAuthProvider {
    fn name(&self) -> &str {
        "static-auth"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::Authentication
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        match input {
            CheckInput::Auth { .. } => Ok(CheckOutput::Auth(self.result.clone())),
            _ => Err(CheckError::MalformedInput(
                "authentication provider requires auth input".to_string(),
            )),
        }
    }
}
