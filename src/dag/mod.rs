// src/dag/mod.rs

//! Static Graph Model of a computation.
//!
//! - [`descriptor`] holds the opaque processor / input / output descriptors.
//! - [`graph`] defines vertices, edges, vertex groups and the validated,
//!   immutable [`Dag`] produced by [`DagBuilder`].
//! - [`validate`] checks names, group membership and acyclicity.
//!
//! Nothing here has behaviour beyond lookups; every runtime component reads
//! the `Dag` and never mutates it.

pub mod descriptor;
pub mod graph;
pub mod validate;

pub use descriptor::{InputDescriptor, OutputDescriptor, ProcessorDescriptor};
pub use graph::{
    Dag, DagBuilder, Edge, EdgeProperty, GroupInputEdge, Parallelism, Upstream, Vertex,
    VertexGroup,
};
