// src/dag/mod.rs

//! Instance graph construction and scheduling.
//!
//! - [`instantiate`] turns task definitions plus a file listing into concrete
//!   [`instance::TaskInstance`]s.
//! - [`graph`] derives data and ordering edges, rejects duplicate producers
//!   and cycles, and fixes the canonical tie-break order.
//! - [`scheduler`] is the per-run state machine deciding what is ready and
//!   what gets blocked when something fails.
//! - [`task_info`] provides instance status and scheduled job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod instance;
pub mod instantiate;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::{EdgeKind, InstanceGraph};
pub use instance::{GlobOutput, InstanceId, TaskInstance, instance_fingerprint};
pub use instantiate::instantiate_all;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{Completion, InstanceStatus, ScheduledJob};
