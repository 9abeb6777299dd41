use async_trait::async_trait;
use serde_json::{Map, Value};

/// Capability every data tool exposes to the engine. The engine only ever
/// sees this trait; concrete tools are registered by name at startup.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Invocation error: {0}")]
    Invocation(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Communication(_) => "COMMUNICATION_ERROR",
            ToolError::Http { .. } => "HTTP_ERROR",
            ToolError::Invocation(_) => "INVOCATION_ERROR",
            ToolError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}
