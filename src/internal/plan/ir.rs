use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PlanMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub query: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "estimatedDuration", alias = "estimated_duration")]
    pub estimated_duration_ms: Option<u64>,
}

/// One tool invocation. Steps are addressed by their position in `Plan::steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, alias = "dependsOn", skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<usize>>,
    // Informational only, the scheduler derives parallelism from the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

impl Step {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Map::new(),
            depends_on: None,
            parallel: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on = Some(deps.into_iter().collect());
        self
    }

    pub fn dependencies(&self) -> &[usize] {
        self.depends_on.as_deref().unwrap_or(&[])
    }
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            metadata: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let metadata = self.metadata.get_or_insert_with(PlanMetadata::default);
        metadata.query = Some(query.into());
        metadata.timestamp.get_or_insert_with(Utc::now);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Decodes a plan from untrusted JSON. Shape problems in a step are
    /// reported against that step rather than as a bare decode failure.
    pub fn from_json(value: Value) -> Result<Self, PlanValidationError> {
        if let Some(steps) = value.get("steps").and_then(Value::as_array) {
            for (index, step) in steps.iter().enumerate() {
                if !step.get("tool").is_some_and(Value::is_string) {
                    return Err(PlanValidationError::MissingTool(index));
                }
                let deps = step.get("depends_on").or_else(|| step.get("dependsOn"));
                if let Some(Value::Array(deps)) = deps {
                    if let Some(bad) = deps.iter().find(|dep| dep.as_u64().is_none()) {
                        return Err(PlanValidationError::InvalidDependency {
                            step: index,
                            value: bad.to_string(),
                        });
                    }
                }
            }
        }

        serde_json::from_value(value).map_err(|e| PlanValidationError::Malformed(e.to_string()))
    }

    // Input contract checks only. Dependency indices and cycles are the graph's job.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.tool.trim().is_empty() {
                return Err(PlanValidationError::MissingTool(index));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("Plan cannot be empty")]
    EmptyPlan,
    #[error("Step {0} has no tool specified")]
    MissingTool(usize),
    #[error("Invalid dependency index {value} in step {step}")]
    InvalidDependency { step: usize, value: String },
    #[error("Malformed plan: {0}")]
    Malformed(String),
}
