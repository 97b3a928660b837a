// src/container/mod.rs

//! Execution containers granted by the resource allocator.

pub mod pool;
pub mod state;

pub use pool::ContainerPool;
pub use state::{AssignOutcome, Container, ContainerState, StopOutcome};
