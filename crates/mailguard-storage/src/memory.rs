//! In-memory message store
//!
//! Used by tests and single-node deployments without PostgreSQL. The whole
//! map sits behind one async mutex so compare-and-set is atomic with respect
//! to concurrent writers, matching the guarantees of the SQL backend.

use crate::models::{AuditLogEntry, MessageRecord};
use crate::store::{CasOutcome, MessageStore};
use async_trait::async_trait;
use chrono::Utc;
use mailguard_common::report::SecurityReport;
use mailguard_common::types::{MessageId, MessageStatus};
use mailguard_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    messages: HashMap<MessageId, MessageRecord>,
    audit_log: Vec<AuditLogEntry>,
}

/// Mutex-backed message store
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Mutex<Inner>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded for a message, in order
    pub async fn audit_entries(&self, id: MessageId) -> Vec<AuditLogEntry> {
        self.inner
            .lock()
            .await
            .audit_log
            .iter()
            .filter(|e| e.message_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, record: &MessageRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.messages.contains_key(&record.id) {
            return Err(Error::Validation(format!(
                "Message {} already exists",
                record.id
            )));
        }
        inner.messages.insert(record.id, record.clone());
        Ok(())
    }

    async fn read(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        Ok(self.inner.lock().await.messages.get(&id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        new: MessageStatus,
        report: Option<&SecurityReport>,
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let record = match inner.messages.get_mut(&id) {
            Some(r) => r,
            None => return Ok(CasOutcome::NotFound),
        };

        let actual = record.message_status()?;
        if actual != expected {
            return Ok(CasOutcome::Conflict { actual });
        }

        record.status = new.as_str().to_string();
        if let Some(report) = report {
            record.security_report = Some(
                serde_json::to_value(report).map_err(|e| Error::Internal(e.to_string()))?,
            );
        }
        record.updated_at = Utc::now();
        Ok(CasOutcome::Applied)
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<MessageRecord> = inner
            .messages
            .values()
            .filter(|r| r.status == status.as_str())
            .cloned()
            .collect();
        records.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        self.inner.lock().await.audit_log.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailguard_common::types::{Direction, MailMessage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use uuid::Uuid;

    fn sample_record() -> MessageRecord {
        let message = MailMessage {
            id: Uuid::now_v7(),
            mailbox_id: Uuid::now_v7(),
            direction: Direction::Inbound,
            from: "sender@example.com".to_string(),
            to: vec!["user@mailguard.test".to_string()],
            subject: "Subject".to_string(),
            body: "Body".to_string(),
            headers: Default::default(),
            sender_ip: None,
            attachments: Vec::new(),
            received_at: Utc::now(),
        };
        MessageRecord::from_message(&message).unwrap()
    }

    #[tokio::test]
    async fn test_cas_applies_and_conflicts() {
        let store = MemoryMessageStore::new();
        let record = sample_record();
        store.create(&record).await.unwrap();

        let outcome = store
            .compare_and_set_status(
                record.id,
                MessageStatus::Pending,
                MessageStatus::Quarantined,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied);

        // Second writer with the stale expected state loses
        let outcome = store
            .compare_and_set_status(
                record.id,
                MessageStatus::Pending,
                MessageStatus::Blocked,
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CasOutcome::Conflict {
                actual: MessageStatus::Quarantined
            }
        );
    }

    #[tokio::test]
    async fn test_cas_missing_record() {
        let store = MemoryMessageStore::new();
        let outcome = store
            .compare_and_set_status(
                Uuid::now_v7(),
                MessageStatus::Pending,
                MessageStatus::Blocked,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_cas_exactly_one_wins() {
        let store = Arc::new(MemoryMessageStore::new());
        let record = sample_record();
        store.create(&record).await.unwrap();

        let a = {
            let store = store.clone();
            let id = record.id;
            tokio::spawn(async move {
                store
                    .compare_and_set_status(
                        id,
                        MessageStatus::Pending,
                        MessageStatus::Quarantined,
                        None,
                    )
                    .await
                    .unwrap()
            })
        };
        let b = {
            let store = store.clone();
            let id = record.id;
            tokio::spawn(async move {
                store
                    .compare_and_set_status(
                        id,
                        MessageStatus::Pending,
                        MessageStatus::Blocked,
                        None,
                    )
                    .await
                    .unwrap()
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let applied = [a, b]
            .iter()
            .filter(|o| matches!(o, CasOutcome::Applied))
            .count();
        let conflicts = [a, b]
            .iter()
            .filter(|o| matches!(o, CasOutcome::Conflict { .. }))
            .count();
        assert_eq!(applied, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_list_by_status_and_audit() {
        let store = MemoryMessageStore::new();
        let record = sample_record();
        store.create(&record).await.unwrap();

        let pending = store
            .list_by_status(MessageStatus::Pending, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        store
            .append_audit(AuditLogEntry::new(record.id, "scan:quarantined", "scanner"))
            .await
            .unwrap();
        let entries = store.audit_entries(record.id).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "scan:quarantined");
    }
}
