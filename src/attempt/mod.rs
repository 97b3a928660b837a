// src/attempt/mod.rs

//! Task and task-attempt lifecycles.

pub mod counters;
pub mod state;
pub mod task;

pub use counters::Counters;
pub use state::{AttemptState, TaskAttempt};
pub use task::{RetryDecision, Task, TaskState};
