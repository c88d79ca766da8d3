//! Core orchestration logic for the Istio fleet-upgrade guard: the
//! registry, distributed lock, check/validator frameworks, GitOps and
//! rollback producers, the reconciliation/validation engine, and the
//! batch runner that composes them into one cluster pipeline at a time.

pub mod batch_runner;
pub mod checks;
pub mod config_editor;
pub mod error;
pub mod gitops;
pub mod lock;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod rollback;
pub mod validation_engine;
pub mod validators;

pub use batch_runner::{BatchRunner, BatchRunnerConfig};
pub use error::GuardError;
pub use gitops::GitOpsOrchestrator;
pub use lock::{auto_renew, with_lock, DistributedLock, InMemoryDistributedLock};
pub use registry::{InMemoryStateStore, StateStore};
pub use rollback::RollbackProducer;
pub use validation_engine::ValidationEngine;
