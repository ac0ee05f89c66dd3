//! PostgreSQL message store

use crate::db::DatabasePool;
use crate::models::{AuditLogEntry, MessageRecord};
use crate::store::{CasOutcome, MessageStore};
use async_trait::async_trait;
use mailguard_common::report::SecurityReport;
use mailguard_common::types::{MessageId, MessageStatus};
use mailguard_common::{Error, Result};

/// sqlx-backed message store
pub struct PgMessageStore {
    pool: DatabasePool,
}

impl PgMessageStore {
    /// Create a new store
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, record: &MessageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, mailbox_id, direction, from_address, to_addresses,
                subject, body, headers, has_attachments, status,
                security_report, received_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            "#,
        )
        .bind(record.id)
        .bind(record.mailbox_id)
        .bind(&record.direction)
        .bind(&record.from_address)
        .bind(&record.to_addresses)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(&record.headers)
        .bind(record.has_attachments)
        .bind(&record.status)
        .bind(&record.security_report)
        .bind(record.received_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn read(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn compare_and_set_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        new: MessageStatus,
        report: Option<&SecurityReport>,
    ) -> Result<CasOutcome> {
        let report_json = report
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| Error::Internal(e.to_string()))?;

        // The WHERE clause on the prior status is the optimistic guard;
        // rows_affected == 0 means either a conflict or a missing row.
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $3,
                security_report = COALESCE($4, security_report),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .bind(&report_json)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(CasOutcome::Applied);
        }

        match self.status(id).await? {
            Some(actual) => Ok(CasOutcome::Conflict { actual }),
            None => Ok(CasOutcome::NotFound),
        }
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT * FROM messages
            WHERE status = $1
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_audit_log (id, message_id, action, actor, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.message_id)
        .bind(&entry.action)
        .bind(&entry.actor)
        .bind(entry.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
