use crate::internal::{
    exec::{
        result::{ErrorInfo, ResultMetadata, ResultStore, ToolResult, TASK_PANICKED},
        runner::StepRunner,
        template::{referenced_steps, TemplateResolver},
    },
    plan::{
        graph::{DependencyGraph, GraphError},
        ir::{Plan, PlanValidationError},
    },
    trace::trace::{TraceLog, STEP_END, STEP_START},
};
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde_json::json;
use std::{collections::BTreeSet, time::Instant};
use tokio::task::JoinError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Plan validation failed: {0}")]
    InvalidPlan(#[from] PlanValidationError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Step {index} failed: {message}")]
    StepFailed {
        index: usize,
        tool: String,
        message: String,
    },
    #[error("Execution stalled with steps {pending:?} never becoming ready")]
    Stalled { pending: Vec<usize> },
}

type Running =
    FuturesUnordered<BoxFuture<'static, (usize, Instant, Result<ToolResult, JoinError>)>>;

/// Runs every step of a validated plan as soon as its dependencies have
/// been attempted, keeping at most `max_parallel_executions` in flight.
pub struct Scheduler {
    runner: StepRunner,
}

impl Scheduler {
    pub fn new(runner: StepRunner) -> Self {
        Self { runner }
    }

    pub async fn run(
        &self,
        plan: &Plan,
        graph: &DependencyGraph,
        trace: &mut TraceLog,
    ) -> Result<ResultStore, ExecutionError> {
        let policy = self.runner.policy();
        let ceiling = policy.concurrency_ceiling();
        let fail_fast = policy.fail_fast;

        let mut store = ResultStore::new(plan.len());
        let mut ready: BTreeSet<usize> = graph.roots().into_iter().collect();
        let mut running: Running = FuturesUnordered::new();

        loop {
            while running.len() < ceiling {
                let Some(index) = ready.pop_first() else {
                    break;
                };
                self.launch(plan, index, &store, &mut running, trace);
            }

            let Some((index, started, joined)) = running.next().await else {
                break;
            };

            let tool = &plan.steps[index].tool;
            let result = joined.unwrap_or_else(|e| {
                tracing::error!(step = index, tool = tool.as_str(), "Step task aborted: {}", e);
                ToolResult::failure(
                    tool.as_str(),
                    ErrorInfo::new(TASK_PANICKED, format!("Step task aborted: {}", e)),
                    ResultMetadata::new(started.elapsed().as_millis() as u64, 0),
                )
            });

            trace.step_event(
                index,
                STEP_END,
                json!({
                    "tool": tool,
                    "success": result.success,
                    "execution_time_ms": result.metadata.execution_time_ms,
                    "retries": result.metadata.retries,
                    "error": result.error,
                }),
            );

            if !result.success && fail_fast {
                let message = result
                    .error_message()
                    .unwrap_or("unknown error")
                    .to_string();
                tracing::error!(
                    plan_id = trace.plan_id(),
                    step = index,
                    tool = tool.as_str(),
                    in_flight = running.len(),
                    "Fail-fast abort: {}",
                    message
                );
                // Dropping `running` detaches in-flight steps, their results are discarded.
                return Err(ExecutionError::StepFailed {
                    index,
                    tool: tool.clone(),
                    message,
                });
            }

            store.record(index, result);
            tracing::debug!(
                step = index,
                recorded = store.recorded(),
                total = store.len(),
                "Step recorded"
            );

            // A failed dependency still counts as attempted.
            for &dependent in graph.dependents(index) {
                if graph.is_ready(dependent, |dep| store.is_recorded(dep)) {
                    ready.insert(dependent);
                }
            }
        }

        if !store.is_complete() {
            return Err(ExecutionError::Stalled {
                pending: (0..store.len()).filter(|&i| !store.is_recorded(i)).collect(),
            });
        }

        Ok(store)
    }

    fn launch(
        &self,
        plan: &Plan,
        index: usize,
        store: &ResultStore,
        running: &mut Running,
        trace: &mut TraceLog,
    ) {
        let step = &plan.steps[index];
        tracing::debug!(step = index, tool = step.tool.as_str(), "Launching step");
        trace.step_event(
            index,
            STEP_START,
            json!({
                "tool": step.tool,
                "depends_on": step.dependencies(),
                "references": referenced_steps(&step.params),
            }),
        );

        // Templates are evaluated exactly once, when the step becomes ready.
        let started = Instant::now();
        let params = TemplateResolver::new(store).resolve_params(&step.params);
        let runner = self.runner.clone();
        let tool = step.tool.clone();

        let handle = tokio::spawn(async move { runner.run(index, &tool, params, started).await });
        running.push(handle.map(move |joined| (index, started, joined)).boxed());
    }
}
