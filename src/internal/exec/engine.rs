//! Top-level plan execution.
//!
//! ```text
//! Plan -> validate -> DependencyGraph (cycle gate) -> Scheduler -> StepRunner -> ResultStore
//! ```
//!
//! Structural problems (empty plan, bad dependency index, cycles) are
//! rejected before any step runs. Step failures are captured in their
//! `ToolResult` unless the policy is fail-fast.

use crate::internal::{
    exec::{
        policy::ExecutionPolicy,
        result::ToolResult,
        runner::StepRunner,
        scheduler::{ExecutionError, Scheduler},
    },
    plan::{graph::DependencyGraph, ir::Plan},
    registry::ToolRegistry,
    trace::trace::{Trace, TraceLog, PLAN_END, PLAN_START},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    policy: ExecutionPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub plan_id: String,
    pub results: Vec<ToolResult>,
    pub traces: Vec<Trace>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Indices of steps whose result is a failure.
    pub fn failed_steps(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, result)| !result.success)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.success).count()
    }
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Structural checks only; nothing is executed.
    pub fn validate(&self, plan: &Plan) -> Result<DependencyGraph, ExecutionError> {
        plan.validate()?;
        Ok(DependencyGraph::build(plan)?)
    }

    /// One result per step, in plan order.
    pub async fn execute(&self, plan: &Plan) -> Result<Vec<ToolResult>, ExecutionError> {
        self.execute_with_report(plan).await.map(|report| report.results)
    }

    pub async fn execute_with_policy(
        &self,
        plan: &Plan,
        policy: &ExecutionPolicy,
    ) -> Result<Vec<ToolResult>, ExecutionError> {
        self.clone()
            .with_policy(policy.clone())
            .execute(plan)
            .await
    }

    pub async fn execute_with_report(&self, plan: &Plan) -> Result<ExecutionReport, ExecutionError> {
        let plan_id = Uuid::new_v4().to_string();
        self.run(plan, plan_id).await
    }

    async fn run(&self, plan: &Plan, plan_id: String) -> Result<ExecutionReport, ExecutionError> {
        let graph = self.validate(plan).map_err(|e| {
            tracing::error!(plan_id = plan_id.as_str(), "Rejecting plan: {}", e);
            e
        })?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let query = plan.metadata.as_ref().and_then(|m| m.query.clone());
        tracing::info!(
            plan_id = plan_id.as_str(),
            steps = plan.len(),
            max_parallel = self.policy.concurrency_ceiling(),
            "Executing plan"
        );

        let mut trace = TraceLog::new(plan_id.clone());
        trace.plan_event(PLAN_START, json!({ "steps": plan.len(), "query": query }));

        let runner = StepRunner::new(self.registry.clone(), self.policy.clone());
        let store = Scheduler::new(runner).run(plan, &graph, &mut trace).await?;

        let pending: Vec<usize> = (0..store.len()).filter(|&i| !store.is_recorded(i)).collect();
        let results = store
            .into_ordered()
            .ok_or(ExecutionError::Stalled { pending })?;

        let duration_ms = clock.elapsed().as_millis() as u64;
        let failed = results.iter().filter(|r| !r.success).count();
        trace.plan_event(
            PLAN_END,
            json!({ "duration_ms": duration_ms, "failed": failed }),
        );
        tracing::info!(
            plan_id = plan_id.as_str(),
            duration_ms,
            failed,
            "Plan execution finished"
        );

        Ok(ExecutionReport {
            plan_id,
            results,
            traces: trace.into_events(),
            started_at,
            duration_ms,
        })
    }
}
