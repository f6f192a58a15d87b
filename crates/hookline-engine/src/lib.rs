//! Hookline run engine.
//!
//! Sequences the content-generation stages over one branch at a time, pauses
//! at a human gate after every stage, fans per-unit work out over a bounded
//! worker pool, and keeps derived artifacts honest through the staleness
//! manifest. The [`coordinator::RunCoordinator`] is the single entry point;
//! everything else here is its machinery.

pub mod coordinator;
pub mod events;
pub mod gate;
pub mod quality;
pub mod retry;
pub mod runner;

pub use coordinator::{RunCoordinator, SharedCoordinator, StageOverride};
pub use events::{EventEmitter, RunEvent};
pub use gate::GateController;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use runner::{StageReport, StageRunner, StageTask};
