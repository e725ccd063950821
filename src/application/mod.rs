pub mod bootstrap;
pub mod clock;
pub mod engine;
pub mod runtime;
pub mod summaries;
pub mod sync;
pub mod tick_scheduler;
pub mod undo_delete;
