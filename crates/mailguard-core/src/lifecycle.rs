//! Message lifecycle manager
//!
//! Owns every status transition. All writes go through the store's
//! compare-and-set so a scan retry racing an admin action can never clobber
//! the other's outcome; the loser observes a conflict and re-reads.
//!
//! Allowed transitions:
//!   pending            -> scanned-delivered | scanned-warning | quarantined
//!                         | blocked | failed
//!   quarantined        -> delivered (admin allow) | blocked (admin block)
//!   any non-terminal   -> deleted (user delete)
//! Blocked, deleted and failed are terminal.

use mailguard_common::report::SecurityReport;
use mailguard_common::types::{MessageId, MessageStatus};
use mailguard_common::{Error, Result};
use mailguard_storage::{AuditLogEntry, CasOutcome, MessageStore};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LifecycleManager {
    store: Arc<dyn MessageStore>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Record a completed scan: transition the message out of `pending`
    /// according to the report's disposition and attach the report.
    ///
    /// Returns the new status. A conflict means another actor already moved
    /// the message (a concurrent duplicate scan, or a user delete); the scan
    /// result is discarded in that case.
    pub async fn apply_scan_result(
        &self,
        id: MessageId,
        report: &SecurityReport,
    ) -> Result<MessageStatus> {
        let new = report.disposition.scanned_status();
        match self
            .store
            .compare_and_set_status(id, MessageStatus::Pending, new, Some(report))
            .await?
        {
            CasOutcome::Applied => {
                info!(message_id = %id, status = %new, score = report.score, "Scan result applied");
                self.store
                    .append_audit(AuditLogEntry::new(
                        id,
                        format!("scan:{}", report.disposition),
                        "scanner",
                    ))
                    .await?;
                Ok(new)
            }
            CasOutcome::Conflict { actual } => {
                warn!(message_id = %id, actual = %actual, "Scan result discarded, message already transitioned");
                Err(Error::TransitionConflict {
                    expected: MessageStatus::Pending,
                    actual,
                })
            }
            CasOutcome::NotFound => Err(Error::NotFound(format!("message {}", id))),
        }
    }

    /// Admin release: quarantined -> delivered
    pub async fn allow(&self, id: MessageId, actor: &str) -> Result<()> {
        self.admin_transition(id, MessageStatus::Delivered, "admin:allow", actor)
            .await
    }

    /// Admin rejection: quarantined -> blocked
    pub async fn block(&self, id: MessageId, actor: &str) -> Result<()> {
        self.admin_transition(id, MessageStatus::Blocked, "admin:block", actor)
            .await
    }

    async fn admin_transition(
        &self,
        id: MessageId,
        new: MessageStatus,
        action: &str,
        actor: &str,
    ) -> Result<()> {
        match self
            .store
            .compare_and_set_status(id, MessageStatus::Quarantined, new, None)
            .await?
        {
            CasOutcome::Applied => {
                info!(message_id = %id, status = %new, actor, "Admin transition applied");
                self.store
                    .append_audit(AuditLogEntry::new(id, action, actor))
                    .await
            }
            CasOutcome::Conflict { actual } => Err(Error::TransitionConflict {
                expected: MessageStatus::Quarantined,
                actual,
            }),
            CasOutcome::NotFound => Err(Error::NotFound(format!("message {}", id))),
        }
    }

    /// User delete: any non-terminal status -> deleted.
    ///
    /// The current status is read first, then used as the expected state of
    /// the write. One conflict retry covers the window where a scan lands
    /// between the read and the write.
    pub async fn delete(&self, id: MessageId, actor: &str) -> Result<()> {
        let mut last_conflict = None;
        for _ in 0..2 {
            let current = self
                .store
                .status(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("message {}", id)))?;

            if current.is_terminal() {
                return Err(Error::Validation(format!(
                    "cannot delete message in terminal status {}",
                    current
                )));
            }

            match self
                .store
                .compare_and_set_status(id, current, MessageStatus::Deleted, None)
                .await?
            {
                CasOutcome::Applied => {
                    info!(message_id = %id, actor, "Message deleted");
                    return self
                        .store
                        .append_audit(AuditLogEntry::new(id, "user:delete", actor))
                        .await;
                }
                CasOutcome::Conflict { actual } => {
                    warn!(message_id = %id, actual = %actual, "Delete raced a transition, retrying");
                    last_conflict = Some((current, actual));
                }
                CasOutcome::NotFound => {
                    return Err(Error::NotFound(format!("message {}", id)))
                }
            }
        }

        let (expected, actual) =
            last_conflict.ok_or_else(|| Error::Internal("delete retry state lost".to_string()))?;
        Err(Error::TransitionConflict { expected, actual })
    }

    /// Scanning gave up on the message: pending -> failed.
    ///
    /// A conflict here is not an error; it means the message no longer needs
    /// failing (deleted, or a duplicate job already scanned it).
    pub async fn mark_failed(&self, id: MessageId, reason: &str) -> Result<()> {
        match self
            .store
            .compare_and_set_status(id, MessageStatus::Pending, MessageStatus::Failed, None)
            .await?
        {
            CasOutcome::Applied => {
                warn!(message_id = %id, reason, "Message marked failed");
                self.store
                    .append_audit(AuditLogEntry::new(id, format!("scan:failed:{}", reason), "scanner"))
                    .await
            }
            CasOutcome::Conflict { actual } => {
                info!(message_id = %id, actual = %actual, "Skipping failure mark, message already transitioned");
                Ok(())
            }
            CasOutcome::NotFound => Err(Error::NotFound(format!("message {}", id))),
        }
    }
}
