//! URL reputation providers

use crate::checks::{CheckCategory, CheckError, CheckInput, CheckOutput, CheckProvider};
use async_trait::async_trait;
use mailguard_common::report::{UrlScanEntry, UrlThreatFlags, UrlVerdict};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::{Host, Url};

/// TLDs disproportionately used in phishing and malware campaigns
const SUSPICIOUS_TLDS: &[&str] = &[
    "zip", "mov", "xyz", "top", "click", "work", "loan", "gq", "tk", "ml", "cf", "icu",
];

/// Well-known URL shortener hosts
const URL_SHORTENERS: &[&str] = &[
    "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly", "is.gd", "buff.ly", "cutt.ly",
];

/// Keywords that, combined with another indicator, suggest a phishing lure
const PHISHING_KEYWORDS: &[&str] = &[
    "login", "signin", "verify", "password", "account", "banking", "secure", "update",
];

/// Fast local heuristics: suspicious TLDs, punycode hosts, URL shorteners,
/// IP-literal hosts, credentials embedded in the URL, and a configurable
/// domain blocklist. No network I/O.
pub struct HeuristicUrlProvider {
    blocklist: HashSet<String>,
}

impl HeuristicUrlProvider {
    pub fn new(blocklist: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocklist: blocklist.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    fn scan_url(&self, raw: &str) -> UrlScanEntry {
        let parsed = match Url::parse(raw) {
            Ok(u) => u,
            Err(_) => {
                // Unparseable URLs cannot be vouched for
                return UrlScanEntry::unknown(raw);
            }
        };

        let domain = match parsed.host() {
            Some(Host::Domain(d)) => d.to_lowercase(),
            Some(host) => host.to_string(),
            None => String::new(),
        };

        let mut threats = UrlThreatFlags::default();
        let mut penalty = 0.0_f64;

        if self.blocklist.contains(&domain) {
            threats.malware = true;
        }

        threats.punycode = domain.split('.').any(|label| label.starts_with("xn--"));
        threats.url_shortener = URL_SHORTENERS.contains(&domain.as_str());
        threats.suspicious_tld = domain
            .rsplit('.')
            .next()
            .map(|tld| SUSPICIOUS_TLDS.contains(&tld))
            .unwrap_or(false);

        let ip_literal = matches!(parsed.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
        let has_credentials = !parsed.username().is_empty() || parsed.password().is_some();

        let lure = {
            let haystack = format!("{}{}", parsed.path(), parsed.query().unwrap_or(""));
            let haystack = haystack.to_lowercase();
            PHISHING_KEYWORDS.iter().any(|k| haystack.contains(k))
        };

        // Credential-bearing or lure URLs combined with a disguise indicator
        // look like phishing rather than mere spam
        threats.phishing =
            (has_credentials || lure) && (threats.punycode || threats.suspicious_tld || ip_literal);

        if threats.punycode {
            penalty += 0.3;
        }
        if threats.url_shortener {
            penalty += 0.2;
        }
        if threats.suspicious_tld {
            penalty += 0.25;
        }
        if ip_literal {
            penalty += 0.3;
        }
        if has_credentials {
            penalty += 0.4;
        }

        let verdict = if threats.malware {
            UrlVerdict::Malicious
        } else if threats.phishing {
            UrlVerdict::Phishing
        } else if threats.punycode || threats.url_shortener || threats.suspicious_tld || ip_literal
        {
            UrlVerdict::Suspicious
        } else {
            UrlVerdict::Safe
        };

        let reputation = if threats.malware {
            0.0
        } else {
            (1.0 - penalty).clamp(0.0, 1.0)
        };

        UrlScanEntry {
            url: raw.to_string(),
            domain,
            verdict,
            reputation,
            threats,
        }
    }
}

#[async_trait]
impl CheckProvider for HeuristicUrlProvider {
    fn name(&self) -> &str {
        "heuristic-url"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::UrlReputation
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let urls = match input {
            CheckInput::Urls { urls } => urls,
            _ => {
                return Err(CheckError::MalformedInput(
                    "url provider requires url input".to_string(),
                ))
            }
        };

        let entries = urls.iter().map(|u| self.scan_url(u)).collect();
        Ok(CheckOutput::Urls(entries))
    }
}

/// Request payload for the remote reputation service
#[derive(Debug, Serialize)]
struct ReputationRequest<'a> {
    urls: &'a [String],
}

/// One reputation verdict from the remote service
#[derive(Debug, Deserialize)]
struct ReputationEntry {
    url: String,
    #[serde(default)]
    domain: String,
    verdict: String,
    #[serde(default)]
    reputation: f64,
}

/// Remote reputation lookup over HTTP.
///
/// Failures (network, non-success status, malformed body) degrade to a
/// `CheckError`; they never fail the scan job.
pub struct RemoteReputationProvider {
    endpoint: String,
    client: Client,
}

impl RemoteReputationProvider {
    /// Create a new client for the given endpoint
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    fn parse_verdict(s: &str) -> UrlVerdict {
        match s {
            "safe" => UrlVerdict::Safe,
            "suspicious" => UrlVerdict::Suspicious,
            "phishing" => UrlVerdict::Phishing,
            "malicious" => UrlVerdict::Malicious,
            _ => UrlVerdict::Unknown,
        }
    }
}

#[async_trait]
impl CheckProvider for RemoteReputationProvider {
    fn name(&self) -> &str {
        "remote-reputation"
    }

    fn category(&self) -> CheckCategory {
        CheckCategory::UrlReputation
    }

    async fn evaluate(&self, input: &CheckInput) -> Result<CheckOutput, CheckError> {
        let urls = match input {
            CheckInput::Urls { urls } => urls,
            _ => {
                return Err(CheckError::MalformedInput(
                    "url provider requires url input".to_string(),
                ))
            }
        };

        debug!(count = urls.len(), "Querying remote URL reputation");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ReputationRequest { urls })
            .send()
            .await
            .map_err(|e| {
                warn!("Reputation request failed: {}", e);
                CheckError::Provider(format!("reputation request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(CheckError::Provider(format!(
                "reputation service returned {}",
                response.status()
            )));
        }

        let entries: Vec<ReputationEntry> = response.json().await.map_err(|e| {
            CheckError::Provider(format!("failed to parse reputation response: {}", e))
        })?;

        let results = entries
            .into_iter()
            .map(|e| UrlScanEntry {
                domain: e.domain,
                verdict: Self::parse_verdict(&e.verdict),
                reputation: e.reputation.clamp(0.0, 1.0),
                threats: UrlThreatFlags {
                    phishing: e.verdict == "phishing",
                    malware: e.verdict == "malicious",
                    ..Default::default()
                },
                url: e.url,
            })
            .collect();

        Ok(CheckOutput::Urls(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> HeuristicUrlProvider {
        HeuristicUrlProvider::new(vec!["evil.example".to_string()])
    }

    #[test]
    fn test_plain_url_is_safe() {
        let entry = provider().scan_url("https://www.example.com/news");
        assert_eq!(entry.verdict, UrlVerdict::Safe);
        assert!(entry.reputation > 0.8);
    }

    #[test]
    fn test_blocklisted_domain_is_malicious() {
        let entry = provider().scan_url("https://evil.example/anything");
        assert_eq!(entry.verdict, UrlVerdict::Malicious);
        assert_eq!(entry.reputation, 0.0);
        assert!(entry.threats.malware);
    }

    #[test]
    fn test_punycode_lure_is_phishing() {
        let entry = provider().scan_url("https://xn--pypal-4ve.example/login");
        assert_eq!(entry.verdict, UrlVerdict::Phishing);
        assert!(entry.threats.punycode);
        assert!(entry.threats.phishing);
    }

    #[test]
    fn test_shortener_is_suspicious() {
        let entry = provider().scan_url("https://bit.ly/3abcdef");
        assert_eq!(entry.verdict, UrlVerdict::Suspicious);
        assert!(entry.threats.url_shortener);
    }

    #[test]
    fn test_ip_literal_is_suspicious() {
        let entry = provider().scan_url("http://203.0.113.7/download");
        assert_eq!(entry.verdict, UrlVerdict::Suspicious);
    }

    #[test]
    fn test_unparseable_url_is_unknown() {
        let entry = provider().scan_url("notaurl");
        assert_eq!(entry.verdict, UrlVerdict::Unknown);
    }

    #[tokio::test]
    async fn test_remote_provider_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"url": "https://a.example/x", "domain": "a.example", "verdict": "phishing", "reputation": 0.05}
            ])))
            .mount(&server)
            .await;

        let provider = RemoteReputationProvider::new(format!("{}/check", server.uri()), 2000);
        let input = CheckInput::Urls {
            urls: vec!["https://a.example/x".to_string()],
        };
        let output = provider.evaluate(&input).await.unwrap();
        match output {
            CheckOutput::Urls(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].verdict, UrlVerdict::Phishing);
                assert!(entries[0].threats.phishing);
            }
            _ => panic!("expected url output"),
        }
    }

    #[tokio::test]
    async fn test_remote_provider_degrades_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = RemoteReputationProvider::new(server.uri(), 2000);
        let input = CheckInput::Urls {
            urls: vec!["https://a.example/x".to_string()],
        };
        assert!(matches!(
            provider.evaluate(&input).await,
            Err(CheckError::Provider(_))
        ));
    }
}
