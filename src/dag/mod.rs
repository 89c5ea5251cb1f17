// src/dag/mod.rs

pub mod scheduler;

pub use scheduler::{DagScheduler, VertexFuture};
