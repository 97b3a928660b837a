// src/exec/mod.rs

//! Local execution layer.
//!
//! Implements the dispatcher's collaborators in-process and reports back
//! through `EngineEvent`s.
//!
//! - [`backend`] defines the `ResourceAllocator` and `WorkerLauncher`
//!   seams that tests replace with fakes.
//! - [`local_allocator`] hands out containers from a bounded pool.
//! - [`launcher`] keeps one Tokio task per running attempt.
//! - [`attempt_runner`] runs a processor, requests commit and reports.
//! - [`processor`] holds the `Processor` trait and the built-ins.

pub mod attempt_runner;
pub mod backend;
pub mod launcher;
pub mod local_allocator;
pub mod processor;

pub use attempt_runner::AttemptEnv;
pub use backend::{BoxFuture, ResourceAllocator, WorkerLauncher};
pub use launcher::LocalLauncher;
pub use local_allocator::{LOCAL_NODE, LocalAllocator};
pub use processor::{Processor, ProcessorContext, ProcessorRegistry};
