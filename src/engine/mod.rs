//! Orchestration engine: run records, retry policy, and the task driver.

pub mod orchestrator;
pub mod retry;
pub mod run;

pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use run::{Run, RunStatus, TaskKind};
