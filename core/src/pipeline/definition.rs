// sagaflow/src/pipeline/definition.rs

//! Contains the `Pipeline<TData, Err>` struct definition and methods for its
//! construction and structural modification.

use crate::core::context::{Compensator, Handler};
use crate::core::step::{SkipCondition, StepDef};
use crate::error::SagaError;
use std::collections::HashMap;

/// An ordered set of named steps over the root data type `TData`, whose
/// handlers fail with `Err`.
///
/// `Err` must be `From<SagaError>` so engine-level faults (such as a
/// non-optional step without handlers) surface through the same error type
/// the handlers use.
pub struct Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  pub(crate) steps: Vec<StepDef<TData>>,

  pub(crate) before: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) on: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) after: HashMap<String, Vec<Handler<TData, Err>>>,

  // At most one compensator per step.
  pub(crate) compensators: HashMap<String, Compensator<TData, Err>>,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  /// Creates a new `Pipeline` from `(name, optional, skip_if)` step definitions.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_cond_opt)| StepDef {
        name: (*name).to_string(),
        optional: *optional,
        best_effort: false,
        skip_if: skip_cond_opt.clone(),
      })
      .collect();

    Self {
      steps,
      before: HashMap::new(),
      on: HashMap::new(),
      after: HashMap::new(),
      compensators: HashMap::new(),
    }
  }

  /// Step names in execution order.
  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  /// Panics if the step is unknown. Registering a handler against a typo'd
  /// step name is a setup bug, not a runtime condition.
  pub(crate) fn ensure_step_exists(&self, step_name: &str) {
    if !self.steps.iter().any(|s| s.name == step_name) {
      panic!("Sagaflow setup error: Step '{}' not found in pipeline definition.", step_name);
    }
  }

  fn ensure_step_not_exists(&self, step_name: &str) {
    if self.steps.iter().any(|s| s.name == step_name) {
      panic!("Sagaflow setup error: Step '{}' already exists in pipeline definition.", step_name);
    }
  }

  fn step_mut(&mut self, step_name: &str) -> Result<&mut StepDef<TData>, SagaError> {
    self
      .steps
      .iter_mut()
      .find(|s| s.name == step_name)
      .ok_or_else(|| SagaError::StepNotFound {
        step_name: step_name.to_string(),
      })
  }

  fn insert_at(&mut self, existing_step_name: &str, offset: usize, new_step_name: String, optional: bool, skip_if: Option<SkipCondition<TData>>) {
    self.ensure_step_not_exists(&new_step_name);
    match self.steps.iter().position(|s| s.name == existing_step_name) {
      Some(idx) => self.steps.insert(
        idx + offset,
        StepDef {
          name: new_step_name,
          optional,
          best_effort: false,
          skip_if,
        },
      ),
      None => panic!("Sagaflow setup error: Step '{}' not found in pipeline definition.", existing_step_name),
    }
  }

  pub fn insert_before_step<S: Into<String>>(
    &mut self,
    existing_step_name: &str,
    new_step_name: S,
    optional: bool,
    skip_if: Option<SkipCondition<TData>>,
  ) {
    self.insert_at(existing_step_name, 0, new_step_name.into(), optional, skip_if);
  }

  pub fn insert_after_step<S: Into<String>>(
    &mut self,
    existing_step_name: &str,
    new_step_name: S,
    optional: bool,
    skip_if: Option<SkipCondition<TData>>,
  ) {
    self.insert_at(existing_step_name, 1, new_step_name.into(), optional, skip_if);
  }

  /// Removes a step together with its handlers and compensator.
  /// Removing an unknown step is a no-op.
  pub fn remove_step(&mut self, step_name: &str) {
    if let Some(idx) = self.steps.iter().position(|s| s.name == step_name) {
      self.steps.remove(idx);
      self.before.remove(step_name);
      self.on.remove(step_name);
      self.after.remove(step_name);
      self.compensators.remove(step_name);
    }
  }

  pub fn set_optional(&mut self, step_name: &str, optional: bool) -> Result<(), SagaError> {
    self.step_mut(step_name)?.optional = optional;
    Ok(())
  }

  /// A best-effort step never fails the pipeline: its error is logged and
  /// execution moves on to the next step.
  pub fn set_best_effort(&mut self, step_name: &str, best_effort: bool) -> Result<(), SagaError> {
    self.step_mut(step_name)?.best_effort = best_effort;
    Ok(())
  }

  pub fn set_skip_condition(&mut self, step_name: &str, skip_if: Option<SkipCondition<TData>>) -> Result<(), SagaError> {
    self.step_mut(step_name)?.skip_if = skip_if;
    Ok(())
  }
}
