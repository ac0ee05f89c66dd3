//! MailGuard Core - Mail security scanning pipeline
//!
//! This crate provides the scanning pipeline and message disposition state
//! machine: pluggable check providers, the verdict aggregator, the scan
//! orchestrator, the message lifecycle manager, and the job queue with its
//! worker pool.

pub mod aggregate;
pub mod checks;
pub mod lifecycle;
pub mod orchestrator;
pub mod queue;
pub mod service;

pub use aggregate::aggregate;
pub use checks::{
    CheckCategory, CheckError, CheckInput, CheckOutput, CheckProvider, CheckRegistry,
};
pub use lifecycle::LifecycleManager;
pub use orchestrator::{ScanOrchestrator, ScanTimeouts};
pub use queue::{JobQueue, MemoryJobQueue, ScanJob};
pub use service::ScanService;
