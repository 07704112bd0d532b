// sagaflow/src/pipeline/mod.rs

//! Defines the `Pipeline<TData, Err>` struct, its construction, modification, and execution logic.

pub mod definition;
pub mod execution;
pub mod hooks;

pub use definition::Pipeline;
