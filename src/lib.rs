//! Work-focus timer engine: concurrent Pomodoro sessions, a local-first
//! persistence layer mirrored to a per-account remote document, tiered log
//! retention and undoable deletes.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{
    bootstrap_workspace, resume_account, start_runtime, BootstrapResult,
};
pub use application::clock::{system_clock, FakeClock, NowProvider};
pub use application::engine::{
    CompletionKind, CompletionOutcome, Engine, EngineView, LogDecision, LogEntryEdit, ManualEntry,
    PendingConfirmation,
};
pub use application::runtime::{EngineEvent, EngineRuntime};
pub use application::summaries::{SummaryService, TextCapabilities};
pub use domain::models::{
    AccountState, ActiveSession, IntervalKind, LogEntry, RemoteDocument, Settings, Task,
};
pub use domain::stats::LogStats;
pub use infrastructure::config::EngineConfig;
pub use infrastructure::error::InfraError;
pub use infrastructure::logging::init_logging;
