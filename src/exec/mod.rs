// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the commands of task
//! instances, using `tokio::process::Command`, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`command`] renders an instance into a program, arguments and env.
//! - [`executor_loop`] owns the main executor loop which manages job processes.
//! - [`task_runner`] handles individual job execution.
//! - [`process`] puts jobs in their own process group and kills whole trees.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod command;
pub mod executor_loop;
pub mod process;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use command::{PreparedCommand, render_command, render_dirs};
pub use executor_loop::{ExecutorMessage, spawn_executor};
pub use task_runner::{JobContext, execute_job, run_job};
