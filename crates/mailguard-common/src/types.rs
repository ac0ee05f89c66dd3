//! Common types for MailGuard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for mailboxes
pub type MailboxId = Uuid;

/// Unique identifier for scan jobs
pub type JobId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Direction::Inbound),
            "outbound" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message disposition status.
///
/// `Pending` is the only state that accepts a scan result. `Quarantined` is
/// the only state that accepts admin allow/block. `Blocked`, `Deleted` and
/// `Failed` are terminal and reject every further transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    /// Awaiting scan
    Pending,
    /// Scanned clean and delivered
    ScannedDelivered,
    /// Scanned, delivered with a warning flag
    ScannedWarning,
    /// Held for administrator review
    Quarantined,
    /// Blocked by scan verdict or administrator
    Blocked,
    /// Released from quarantine by an administrator
    Delivered,
    /// Soft-deleted, kept for audit
    Deleted,
    /// Scan infrastructure failure after retries were exhausted
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::ScannedDelivered => "scanned-delivered",
            MessageStatus::ScannedWarning => "scanned-warning",
            MessageStatus::Quarantined => "quarantined",
            MessageStatus::Blocked => "blocked",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Deleted => "deleted",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "scanned-delivered" => Some(MessageStatus::ScannedDelivered),
            "scanned-warning" => Some(MessageStatus::ScannedWarning),
            "quarantined" => Some(MessageStatus::Quarantined),
            "blocked" => Some(MessageStatus::Blocked),
            "delivered" => Some(MessageStatus::Delivered),
            "deleted" => Some(MessageStatus::Deleted),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states reject every transition, including soft delete.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Blocked | MessageStatus::Deleted | MessageStatus::Failed
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final delivery decision produced by the verdict aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Delivered,
    DeliveredWithWarning,
    Quarantined,
    Blocked,
}

impl Disposition {
    /// The message status a scan-result transition moves a pending message to
    pub fn scanned_status(&self) -> MessageStatus {
        match self {
            Disposition::Delivered => MessageStatus::ScannedDelivered,
            Disposition::DeliveredWithWarning => MessageStatus::ScannedWarning,
            Disposition::Quarantined => MessageStatus::Quarantined,
            Disposition::Blocked => MessageStatus::Blocked,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Delivered => "delivered",
            Disposition::DeliveredWithWarning => "delivered-with-warning",
            Disposition::Quarantined => "quarantined",
            Disposition::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim_start_matches('<').trim_end_matches('>');
        let parts: Vec<&str> = s.splitn(2, '@').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1].to_lowercase()))
        } else {
            None
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Attachment content handed to the scanning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "serde_bytes_base64")]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Attachment blobs are stored as base64 in job payloads
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A message as handed to the scanning pipeline by the mail layer.
///
/// Carries everything the check providers need; check inputs are sliced out
/// of it so no provider ever sees the whole message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: MessageId,
    pub mailbox_id: MailboxId,
    pub direction: Direction,
    pub from: String,
    /// Ordered, non-empty recipient list
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Connecting client IP, when known (inbound mail)
    pub sender_ip: Option<IpAddr>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub received_at: Timestamp,
}

impl MailMessage {
    /// Validate structural invariants before the message enters the pipeline
    pub fn validate(&self) -> crate::Result<()> {
        if self.to.is_empty() {
            return Err(crate::Error::Validation(
                "Message must have at least one recipient".to_string(),
            ));
        }
        if EmailAddress::parse(&self.from).is_none() {
            return Err(crate::Error::Validation(format!(
                "Invalid sender address: {}",
                self.from
            )));
        }
        Ok(())
    }

    /// Sender domain, lowercased
    pub fn sender_domain(&self) -> Option<String> {
        EmailAddress::parse(&self.from).map(|a| a.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_round_trip() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::ScannedDelivered,
            MessageStatus::ScannedWarning,
            MessageStatus::Quarantined,
            MessageStatus::Blocked,
            MessageStatus::Delivered,
            MessageStatus::Deleted,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::parse("unknown"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(MessageStatus::Blocked.is_terminal());
        assert!(MessageStatus::Deleted.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Quarantined.is_terminal());
        assert!(!MessageStatus::Delivered.is_terminal());
    }

    #[test]
    fn test_disposition_maps_to_scanned_status() {
        assert_eq!(
            Disposition::Delivered.scanned_status(),
            MessageStatus::ScannedDelivered
        );
        assert_eq!(
            Disposition::DeliveredWithWarning.scanned_status(),
            MessageStatus::ScannedWarning
        );
        assert_eq!(
            Disposition::Quarantined.scanned_status(),
            MessageStatus::Quarantined
        );
        assert_eq!(Disposition::Blocked.scanned_status(), MessageStatus::Blocked);
    }

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("user@Example.COM").unwrap();
        assert_eq!(email.local, "user");
        assert_eq!(email.domain, "example.com");
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
    }

    #[test]
    fn test_attachment_base64_round_trip() {
        let attachment = Attachment {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content: vec![0x25, 0x50, 0x44, 0x46, 0xff, 0x00],
        };
        let json = serde_json::to_string(&attachment).unwrap();
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, attachment.content);
    }
}
