//! Database models

use chrono::{DateTime, Utc};
use mailguard_common::report::SecurityReport;
use mailguard_common::types::{MailMessage, MailboxId, MessageId, MessageStatus};
use mailguard_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Message record as persisted.
///
/// Status and security report are only ever written through the store's
/// compare-and-set transition; everything else is immutable after creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub mailbox_id: MailboxId,
    pub direction: String,
    pub from_address: String,
    pub to_addresses: serde_json::Value,
    pub subject: String,
    pub body: String,
    pub headers: serde_json::Value,
    pub has_attachments: bool,
    pub status: String,
    pub security_report: Option<serde_json::Value>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a pending record from a message entering the pipeline
    pub fn from_message(message: &MailMessage) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            id: message.id,
            mailbox_id: message.mailbox_id,
            direction: message.direction.as_str().to_string(),
            from_address: message.from.clone(),
            to_addresses: serde_json::to_value(&message.to)
                .map_err(|e| Error::Internal(e.to_string()))?,
            subject: message.subject.clone(),
            body: message.body.clone(),
            headers: serde_json::to_value(&message.headers)
                .map_err(|e| Error::Internal(e.to_string()))?,
            has_attachments: !message.attachments.is_empty(),
            status: MessageStatus::Pending.as_str().to_string(),
            security_report: None,
            received_at: message.received_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Current status, decoded
    pub fn message_status(&self) -> Result<MessageStatus> {
        MessageStatus::parse(&self.status)
            .ok_or_else(|| Error::Internal(format!("Unknown message status: {}", self.status)))
    }

    /// Attached security report, decoded
    pub fn report(&self) -> Result<Option<SecurityReport>> {
        self.security_report
            .as_ref()
            .map(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| Error::Internal(format!("Corrupt security report: {}", e)))
            })
            .transpose()
    }

    /// Recipient list, decoded
    pub fn recipients(&self) -> Vec<String> {
        serde_json::from_value(self.to_addresses.clone()).unwrap_or_default()
    }
}

/// Append-only audit log entry for a message transition
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub message_id: MessageId,
    pub action: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(message_id: MessageId, action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_id,
            action: action.into(),
            actor: actor.into(),
            created_at: Utc::now(),
        }
    }
}
