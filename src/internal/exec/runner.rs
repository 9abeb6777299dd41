use crate::internal::{
    exec::{
        policy::ExecutionPolicy,
        result::{
            ErrorInfo, ResultMetadata, ResultStore, ToolResult, TEMPLATE_RESOLUTION_FAILED, TIMEOUT,
            TOOL_ERROR, TOOL_NOT_FOUND,
        },
        template::{TemplateError, TemplateResolver},
    },
    plan::ir::Step,
    registry::ToolRegistry,
};
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Instant};
use tokio::time::{sleep, timeout};

/// Executes a single step and always produces a `ToolResult`.
#[derive(Debug, Clone)]
pub struct StepRunner {
    registry: Arc<ToolRegistry>,
    policy: ExecutionPolicy,
}

impl StepRunner {
    pub fn new(registry: Arc<ToolRegistry>, policy: ExecutionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Resolves the step's templates against `store` and runs it.
    pub async fn run_step(&self, index: usize, step: &Step, store: &ResultStore) -> ToolResult {
        let started = Instant::now();
        let params = TemplateResolver::new(store).resolve_params(&step.params);
        self.run(index, &step.tool, params, started).await
    }

    /// Runs a step whose parameters were resolved when it became ready.
    /// `started` marks the beginning of resolution so the reported time
    /// covers resolve, invoke and retries.
    pub async fn run(
        &self,
        index: usize,
        tool_name: &str,
        params: Result<Map<String, Value>, TemplateError>,
        started: Instant,
    ) -> ToolResult {
        let params = match params {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(step = index, tool = tool_name, "Template resolution failed: {}", e);
                let error = ErrorInfo::new(TEMPLATE_RESOLUTION_FAILED, e.to_string())
                    .with_details(json!({ "step": index }));
                return ToolResult::failure(tool_name, error, metadata(started, 0));
            }
        };

        let Some(tool) = self.registry.get(tool_name) else {
            let error = ErrorInfo::new(TOOL_NOT_FOUND, format!("Tool not found: {}", tool_name));
            return ToolResult::failure(tool_name, error, metadata(started, 0));
        };

        let attempts = self.policy.attempts();
        let mut attempt: u32 = 1;

        loop {
            let (error, retryable) =
                match timeout(self.policy.tool_timeout(), tool.execute(&params)).await {
                    Ok(Ok(data)) => {
                        return ToolResult::success(tool_name, data, metadata(started, attempt - 1));
                    }
                    Ok(Err(e)) => {
                        let error = ErrorInfo::new(TOOL_ERROR, e.to_string())
                            .with_details(json!({ "toolCode": e.code(), "attempt": attempt }));
                        (error, true)
                    }
                    Err(_) => {
                        let error = ErrorInfo::new(
                            TIMEOUT,
                            format!(
                                "Timeout: tool '{}' did not respond within {}ms",
                                tool_name, self.policy.tool_timeout_ms
                            ),
                        )
                        .with_details(json!({ "attempt": attempt }));
                        (error, self.policy.retry_on_timeout)
                    }
                };

            if !retryable || attempt >= attempts {
                tracing::debug!(
                    step = index,
                    tool = tool_name,
                    attempt,
                    "Step failed: {}",
                    error.message
                );
                return ToolResult::failure(tool_name, error, metadata(started, attempt - 1));
            }

            let delay = self.policy.retry_delay(attempt);
            tracing::warn!(
                step = index,
                tool = tool_name,
                attempt,
                "Attempt failed, retrying in {:?}: {}",
                delay,
                error.message
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

fn metadata(started: Instant, retries: u32) -> ResultMetadata {
    ResultMetadata::new(started.elapsed().as_millis() as u64, retries)
}
