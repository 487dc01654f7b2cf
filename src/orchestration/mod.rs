//! Orchestration layer: the task queue, the per-task orchestrator and the
//! concurrency primitives they are built on.
//!
//! Control flows down from [`TaskQueue`] to [`TaskOrchestrator`], which fans
//! work out through [`PhaseBarrier`]s onto [`WorkerPool`]s. Remote calls go
//! through a [`RetryableClient`]; image calls additionally consult the
//! [`ServiceFailoverPolicy`]. Status flows back up as events.

pub mod barrier;
pub mod failover;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod retry;

pub use barrier::{BarrierReport, PhaseBarrier, PhaseOutcome};
pub use failover::{FailoverConfig, FailureDecision, ServiceFailoverPolicy, ServiceState, UnitStart};
pub use orchestrator::{TaskOrchestrator, TaskReport};
pub use pool::{run_ordered, Pools, WorkerPool};
pub use progress::{
    progress_for, ProgressTracker, QueueEvent, StatusReporter, TaskOutcome, WorkerEvent,
};
pub use queue::TaskQueue;
pub use retry::{RetryPolicy, RetryableClient};
