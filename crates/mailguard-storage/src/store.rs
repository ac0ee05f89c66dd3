//! Message store contract
//!
//! The persistence store is the single shared mutable resource in the
//! pipeline. Every status write goes through `compare_and_set_status`, an
//! optimistic guard that only succeeds when the stored status still matches
//! the expected prior state. This is what prevents lost updates when a scan
//! retry and an admin action race.

use crate::models::{AuditLogEntry, MessageRecord};
use async_trait::async_trait;
use mailguard_common::report::SecurityReport;
use mailguard_common::types::{MessageId, MessageStatus};
use mailguard_common::Result;

/// Outcome of an optimistic status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored status matched and the transition was applied
    Applied,
    /// The stored status no longer matched the expected prior state
    Conflict { actual: MessageStatus },
    /// No record with that id
    NotFound,
}

/// Narrow read/update contract consumed by the pipeline
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message record (status `pending`)
    async fn create(&self, record: &MessageRecord) -> Result<()>;

    /// Read a message record by id
    async fn read(&self, id: MessageId) -> Result<Option<MessageRecord>>;

    /// Read only the current status
    async fn status(&self, id: MessageId) -> Result<Option<MessageStatus>> {
        Ok(self
            .read(id)
            .await?
            .map(|r| r.message_status())
            .transpose()?)
    }

    /// Read only the attached security report
    async fn security_report(&self, id: MessageId) -> Result<Option<SecurityReport>> {
        match self.read(id).await? {
            Some(record) => record.report(),
            None => Ok(None),
        }
    }

    /// Atomically transition `id` from `expected` to `new`, optionally
    /// attaching (overwriting) the security report
    async fn compare_and_set_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        new: MessageStatus,
        report: Option<&SecurityReport>,
    ) -> Result<CasOutcome>;

    /// List messages currently in a given status, most recent first
    async fn list_by_status(&self, status: MessageStatus, limit: i64)
        -> Result<Vec<MessageRecord>>;

    /// Append an audit log entry
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()>;
}
