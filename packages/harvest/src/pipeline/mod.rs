//! Scan pipeline: filtering and orchestration.

pub mod filter;
pub mod orchestrator;

pub use filter::{FilterEngine, FilterOutcome, Verdict};
pub use orchestrator::{OrchestratorConfig, ScanOrchestrator, DEFAULT_CONCURRENCY, DEFAULT_MAX_PAGES};
