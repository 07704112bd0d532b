// sagaflow/src/pipeline/execution.rs

//! `Pipeline::run()`: executes steps in order and, on failure, unwinds the
//! completed steps through their compensators.

use crate::core::context::Handler;
use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::core::step::StepDef;
use crate::error::SagaError;
use crate::pipeline::definition::Pipeline;
use tracing::{event, instrument, span, Instrument, Level};

enum StepOutcome {
  Skipped,
  Ran(PipelineControl),
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<SagaError> + Send + Sync + 'static,
{
  /// Executes the pipeline against the shared context `ctx_data`.
  ///
  /// - `Ok(Completed)`: every step ran or was skipped.
  /// - `Ok(Stopped)`: a handler returned `PipelineControl::Stop`; no compensation.
  /// - `Err(e)`: a non-best-effort step failed. Compensators of the steps
  ///   completed before it have already run (latest first) when this returns.
  #[instrument(
        name = "Pipeline::run",
        skip_all,
        fields(
            pipeline_context_data_type = %std::any::type_name::<TData>(),
            num_steps = self.steps.len(),
        ),
        err(Display)
    )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");
    let mut completed: Vec<&str> = Vec::new();

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_span = span!(
        Level::INFO,
        "pipeline_step_execution",
        step_name = step_def.name.as_str(),
        step_index = step_idx,
        best_effort = step_def.best_effort
      );

      match self.run_step(step_def, ctx_data.clone()).instrument(step_span).await {
        Ok(StepOutcome::Skipped) => {}
        Ok(StepOutcome::Ran(PipelineControl::Continue)) => completed.push(step_def.name.as_str()),
        Ok(StepOutcome::Ran(PipelineControl::Stop)) => {
          event!(Level::INFO, step_name = %step_def.name, "Pipeline stopped by a handler.");
          return Ok(PipelineResult::Stopped);
        }
        Err(e) if step_def.best_effort => {
          event!(Level::WARN, step_name = %step_def.name, error = %e, "Best-effort step failed; continuing.");
        }
        Err(e) => {
          event!(Level::ERROR, step_name = %step_def.name, error = %e, "Step failed; compensating completed steps.");
          self.compensate(&completed, ctx_data.clone()).await;
          return Err(e);
        }
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed successfully.");
    Ok(PipelineResult::Completed)
  }

  async fn run_step(&self, step_def: &StepDef<TData>, ctx_data: ContextData<TData>) -> Result<StepOutcome, Err> {
    let step_name = step_def.name.as_str();

    if let Some(skip_cond_fn) = &step_def.skip_if {
      if skip_cond_fn(ctx_data.clone()) {
        event!(Level::DEBUG, "Step skipped due to 'skip_if' condition.");
        return Ok(StepOutcome::Skipped);
      }
    }

    let phases = [
      ("before", self.before.get(step_name)),
      ("on", self.on.get(step_name)),
      ("after", self.after.get(step_name)),
    ];

    if !phases.iter().any(|(_, handlers)| matches!(handlers, Some(v) if !v.is_empty())) {
      if step_def.optional {
        event!(Level::DEBUG, "Optional step has no handlers, skipping.");
        return Ok(StepOutcome::Skipped);
      }
      return Err(Err::from(SagaError::HandlerMissing {
        step_name: step_def.name.clone(),
      }));
    }

    for (phase, handlers) in phases {
      let Some(handlers) = handlers else { continue };
      if let PipelineControl::Stop = Self::run_phase(phase, handlers, &ctx_data).await? {
        return Ok(StepOutcome::Ran(PipelineControl::Stop));
      }
    }
    Ok(StepOutcome::Ran(PipelineControl::Continue))
  }

  async fn run_phase(
    phase: &'static str,
    handlers: &[Handler<TData, Err>],
    ctx_data: &ContextData<TData>,
  ) -> Result<PipelineControl, Err> {
    for (handler_idx, handler_fn) in handlers.iter().enumerate() {
      let handler_span = span!(Level::DEBUG, "step_handler", phase, handler_index = handler_idx);
      match handler_fn(ctx_data.clone()).instrument(handler_span).await {
        Ok(PipelineControl::Continue) => {}
        Ok(PipelineControl::Stop) => return Ok(PipelineControl::Stop),
        Err(e) => {
          event!(Level::DEBUG, phase, error = %e, "Handler failed.");
          return Err(e);
        }
      }
    }
    Ok(PipelineControl::Continue)
  }

  /// Runs the compensators of `completed` steps, most recent first. A failing
  /// compensator is logged and the remaining ones still run.
  async fn compensate(&self, completed: &[&str], ctx_data: ContextData<TData>) {
    for step_name in completed.iter().rev() {
      let Some(compensator) = self.compensators.get(*step_name) else {
        continue;
      };
      let span = span!(Level::INFO, "pipeline_step_compensation", step_name = *step_name);
      match compensator(ctx_data.clone()).instrument(span).await {
        Ok(()) => event!(Level::INFO, step_name = *step_name, "Step compensated."),
        Err(e) => event!(Level::ERROR, step_name = *step_name, error = %e, "Compensator failed."),
      }
    }
  }
}
