//! MailGuard Storage - Persistence contracts and backends
//!
//! This crate provides the narrow read/update contract the scanning pipeline
//! consumes: message records with compare-and-set status transitions and an
//! append-only audit log. Two backends are provided, PostgreSQL (sqlx) and
//! an in-memory store used by tests and single-node deployments.

pub mod db;
pub mod memory;
pub mod models;
pub mod pg;
pub mod store;

pub use db::DatabasePool;
pub use memory::MemoryMessageStore;
pub use models::{AuditLogEntry, MessageRecord};
pub use pg::PgMessageStore;
pub use store::{CasOutcome, MessageStore};
