mod host_runtime;
mod orchestrator;
mod runner;
mod scheduler;
mod state;

pub use host_runtime::{HostOptions, HostRuntime, DEFAULT_STATS_INTERVAL};
pub use orchestrator::{
    AuditEntry, BootOutcome, BootReport, KernelCompat, LifecycleOrchestrator, SemverCompat,
    DEFAULT_HOOK_TIMEOUT, HOST_KERNEL_VERSION,
};
pub use runner::{shutdown_token, ShutdownOptions};
pub use scheduler::PeriodicScheduler;
pub use state::{ModuleState, ParseStateError, RuntimeRecord, Snapshot};
