//! Shared utilities for the workspace.

pub mod parallel;

pub use parallel::{in_parallel_region, num_tasks_and_chunk_size, parallel_for, parallel_reduce};
