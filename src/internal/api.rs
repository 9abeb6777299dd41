use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::internal::{
    exec::{
        engine::ExecutionEngine,
        policy::ExecutionPolicy,
        result::ToolResult,
        scheduler::ExecutionError,
    },
    plan::ir::Plan,
    registry::ToolRegistry,
    trace::trace::{Trace, TraceStore},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    pub engine: ExecutionEngine,
    pub plan_traces: Arc<RwLock<TraceStore>>,
}

impl AppState {
    pub fn new(registry: Arc<ToolRegistry>, policy: ExecutionPolicy) -> Self {
        Self {
            engine: ExecutionEngine::new(registry).with_policy(policy),
            plan_traces: Arc::new(RwLock::new(TraceStore::default())),
        }
    }

    /// Number of executed plans whose traces stay queryable.
    pub fn with_trace_retention(mut self, capacity: usize) -> Self {
        self.plan_traces = Arc::new(RwLock::new(TraceStore::new(capacity)));
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/plan/execute", post(execute_plan))
        .route("/v1/plan/validate", post(validate_plan))
        .route("/v1/trace/:plan_id", get(get_trace))
        .route("/v1/tools", get(list_tools))
        .with_state(state)
}

// Plans arrive as raw JSON so shape errors are reported like structural ones.
#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub plan: Value,
    pub policy: Option<ExecutionPolicy>,
}

#[derive(Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub plan_id: String,
    pub status: String,
    pub results: Vec<ToolResult>,
    pub failed_steps: Vec<usize>,
    pub duration_ms: u64,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub plan: Value,
}

#[derive(Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct TraceResponse {
    pub plan_id: String,
    pub traces: Vec<Trace>,
}

fn error_status(error: &ExecutionError) -> StatusCode {
    match error {
        ExecutionError::InvalidPlan(_) | ExecutionError::Graph(_) => StatusCode::BAD_REQUEST,
        ExecutionError::StepFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExecutionError::Stalled { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

async fn execute_plan(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let plan = Plan::from_json(request.plan).map_err(|e| {
        tracing::warn!("Rejecting plan input: {}", e);
        bad_request(ExecutionError::from(e).to_string())
    })?;

    let engine = match request.policy {
        Some(policy) => state.engine.clone().with_policy(policy),
        None => state.engine.clone(),
    };

    match engine.execute_with_report(&plan).await {
        Ok(report) => {
            let failed_steps = report.failed_steps();
            {
                let mut plan_traces = state.plan_traces.write().await;
                plan_traces.insert(report.plan_id.clone(), report.traces);
            }

            Ok(Json(ExecuteResponse {
                plan_id: report.plan_id,
                status: "completed".to_string(),
                results: report.results,
                failed_steps,
                duration_ms: report.duration_ms,
            }))
        }
        Err(e) => {
            tracing::error!("Plan execution failed: {}", e);
            let mut body = serde_json::json!({ "error": e.to_string() });
            if let ExecutionError::StepFailed { index, tool, .. } = &e {
                body["step"] = serde_json::json!(index);
                body["tool"] = serde_json::json!(tool);
            }
            Err((error_status(&e), Json(body)))
        }
    }
}

fn invalid(error: String) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: false,
        error: Some(error),
    })
}

async fn validate_plan(
    State(state): State<AppState>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Json<ValidateResponse> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return invalid(rejection.body_text()),
    };
    let plan = match Plan::from_json(request.plan) {
        Ok(plan) => plan,
        Err(e) => return invalid(ExecutionError::from(e).to_string()),
    };

    match state.engine.validate(&plan) {
        Ok(_) => Json(ValidateResponse {
            valid: true,
            error: None,
        }),
        Err(e) => invalid(e.to_string()),
    }
}

async fn get_trace(
    Path(plan_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TraceResponse>, ApiError> {
    let plan_traces = state.plan_traces.read().await;
    let traces = plan_traces
        .get(&plan_id)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": format!("Plan {} not found", plan_id)})),
            )
        })?
        .to_vec();

    Ok(Json(TraceResponse { plan_id, traces }))
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.engine.registry().names())
}
