// sagaflow/src/lib.rs

//! Sagaflow: an asynchronous step pipeline engine with compensation.
//!
//! A pipeline is an ordered list of named steps. Each step can carry
//! `before`, `on` and `after` handlers plus one compensating handler:
//!  - Handlers share a `ContextData<T>` and may stop the run early.
//!  - Steps can be optional, best-effort, or skipped by a predicate.
//!  - When a step fails, the compensators of the steps that already
//!    completed run in reverse order before the error is returned.
//!
//! This is the shape of a saga: every local commit is paired with the
//! action that undoes it, so a failure in a later step (for example a call
//! to a third party) never leaves earlier effects behind.

pub mod core;
pub mod error;
pub mod pipeline;

// --- Re-exports for the Public API ---

pub use crate::core::context::{Compensator, Handler};
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::pipeline::definition::Pipeline;

pub use crate::error::{SagaError, SagaResult};

/*
    Typical usage:
    1. Define a context struct `MyCtx` for the workflow.
    2. Create a `Pipeline<MyCtx, MyError>` listing its steps.
    3. Register handlers with `.on_root()` (and `.before_root()` / `.after_root()`).
    4. For every step whose effects must be undone on a later failure,
       register a compensator with `.compensate_root()`.
    5. Mark side-effect-only steps (notifications, refunds) with `.set_best_effort()`.
    6. Run with `pipeline.run(ContextData::new(ctx)).await`.
*/
