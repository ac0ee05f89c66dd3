//! Verdict aggregator
//!
//! A pure function from the per-category check results to a single
//! disposition and danger score. Deterministic, no I/O, and monotonic:
//! strictly worse per-check verdicts never produce a lower score or a less
//! severe disposition.

use mailguard_common::config::ScoreWeights;
use mailguard_common::report::{
    AttachmentScanEntry, AttachmentStatus, AuthCheckResult, UrlScanEntry, UrlVerdict,
};
use mailguard_common::types::Disposition;
use mailguard_common::{Error, Result};

/// Severity precedence, highest first:
/// 1. any malicious attachment → blocked
/// 2. any suspicious attachment, or malicious/phishing URL → quarantined
/// 3. SPF, DKIM and DMARC all failed → quarantined
/// 4. partial auth failure, suspicious URL, or any degraded check →
///    delivered with warning
/// 5. everything passed or was not applicable → delivered
pub fn aggregate(
    auth: Option<&AuthCheckResult>,
    urls: &[UrlScanEntry],
    attachments: &[AttachmentScanEntry],
    weights: &ScoreWeights,
) -> Result<(Disposition, f64)> {
    validate_inputs(urls)?;

    let raw = raw_score(auth, urls, attachments, weights);

    let attachment_malicious = attachments
        .iter()
        .any(|a| a.status == AttachmentStatus::Malicious);
    if attachment_malicious {
        return Ok((Disposition::Blocked, 1.0));
    }

    let attachment_suspicious = attachments
        .iter()
        .any(|a| a.status == AttachmentStatus::Suspicious);
    let url_malicious = urls
        .iter()
        .any(|u| matches!(u.verdict, UrlVerdict::Malicious | UrlVerdict::Phishing));
    if attachment_suspicious || url_malicious {
        return Ok((Disposition::Quarantined, raw.min(1.0).max(0.7)));
    }

    let auth_fails = auth.map(|a| a.fail_count()).unwrap_or(0);
    if auth_fails == 3 {
        return Ok((Disposition::Quarantined, raw.min(1.0).max(0.6)));
    }

    let url_suspicious = urls.iter().any(|u| u.verdict == UrlVerdict::Suspicious);
    let degraded = auth.map(|a| a.any_degraded()).unwrap_or(false)
        || urls.iter().any(|u| u.verdict == UrlVerdict::Unknown)
        || attachments
            .iter()
            .any(|a| a.status == AttachmentStatus::TempError);
    if auth_fails > 0 || url_suspicious || degraded {
        return Ok((Disposition::DeliveredWithWarning, raw.clamp(0.3, 0.59)));
    }

    Ok((Disposition::Delivered, raw.min(0.29)))
}

fn validate_inputs(urls: &[UrlScanEntry]) -> Result<()> {
    for entry in urls {
        if !entry.reputation.is_finite() || !(0.0..=1.0).contains(&entry.reputation) {
            return Err(Error::Aggregation(format!(
                "reputation for {} out of range: {}",
                entry.url, entry.reputation
            )));
        }
    }
    Ok(())
}

/// Weighted, additive danger score before the per-rule floors and caps are
/// applied. Additivity over non-negative weights is what makes the final
/// score monotonic in the verdict severities.
fn raw_score(
    auth: Option<&AuthCheckResult>,
    urls: &[UrlScanEntry],
    attachments: &[AttachmentScanEntry],
    weights: &ScoreWeights,
) -> f64 {
    let mut score = 0.0;

    if let Some(auth) = auth {
        score += auth.fail_count() as f64 * weights.auth_fail;
        if auth.any_degraded() {
            score += weights.degraded;
        }
    }

    for url in urls {
        score += match url.verdict {
            UrlVerdict::Safe => 0.0,
            UrlVerdict::Unknown => weights.degraded,
            UrlVerdict::Suspicious => weights.url_suspicious,
            UrlVerdict::Phishing | UrlVerdict::Malicious => weights.url_malicious,
        };
    }

    for attachment in attachments {
        score += match attachment.status {
            AttachmentStatus::Clean => 0.0,
            AttachmentStatus::TempError => weights.degraded,
            AttachmentStatus::Suspicious => weights.attachment_suspicious,
            AttachmentStatus::Malicious => 1.0,
        };
    }

    score
}
