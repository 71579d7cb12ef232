//! Per-source supervision and the controller that owns the running set.

pub mod controller;
pub mod reload;
pub mod supervisor;

pub use controller::{ReloadOutcome, SourceSetController, StopReport};
pub use reload::run_reload_loop;
pub use supervisor::{SessionSupervisor, SupervisorConfig, SupervisorOutcome};
