// src/exec/backend.rs

//! Collaborator seams of the dispatcher.
//!
//! The dispatcher never allocates resources or runs attempts itself. It
//! talks to a [`ResourceAllocator`] and a [`WorkerLauncher`]; both report
//! back asynchronously through [`EngineEvent`]s sent on an
//! [`EventSender`](crate::engine::EventSender), never through the return
//! value of the call.
//!
//! - [`LocalAllocator`](super::LocalAllocator) and
//!   [`LocalLauncher`](super::LocalLauncher) are the in-process
//!   implementations used by the `dagengine` binary.
//! - Tests provide their own implementations that record calls and emit
//!   scripted events.
//!
//! Implementations must return quickly: the dispatcher awaits every call
//! inline, so long work belongs in a spawned task.
//!
//! [`EngineEvent`]: crate::engine::EngineEvent

use std::future::Future;
use std::pin::Pin;

use crate::engine::{ContainerRequest, LaunchRequest};
use crate::errors::Result;
use crate::types::{AttemptId, ContainerId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hands out containers. Grants arrive later as `ContainerAllocated`.
pub trait ResourceAllocator: Send {
    fn request_containers(&mut self, requests: Vec<ContainerRequest>) -> BoxFuture<'_, Result<()>>;

    /// Give a container back. Its worker is stopped; completion is reported
    /// as `ContainerCompleted`.
    fn release_container(&mut self, container: ContainerId) -> BoxFuture<'_, Result<()>>;
}

/// Runs attempts inside containers. Progress is reported as
/// `ContainerLaunched`, `AttemptSucceeded` and `AttemptFailed`.
pub trait WorkerLauncher: Send {
    fn launch(&mut self, request: LaunchRequest) -> BoxFuture<'_, Result<()>>;

    /// Best-effort stop of a running attempt. A killed attempt reports
    /// nothing further.
    fn kill(&mut self, attempt: AttemptId) -> BoxFuture<'_, Result<()>>;
}
