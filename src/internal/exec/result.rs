use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
pub const TEMPLATE_RESOLUTION_FAILED: &str = "TEMPLATE_RESOLUTION_FAILED";
pub const TIMEOUT: &str = "TIMEOUT";
pub const TOOL_ERROR: &str = "TOOL_ERROR";
pub const TASK_PANICKED: &str = "TASK_PANICKED";

/// Normalized outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
}

impl ResultMetadata {
    pub fn new(execution_time_ms: u64, retries: u32) -> Self {
        Self {
            execution_time_ms,
            timestamp: Utc::now(),
            retries,
        }
    }
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl ToolResult {
    pub fn success(tool: impl Into<String>, data: Value, metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            tool: tool.into(),
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn failure(tool: impl Into<String>, error: ErrorInfo, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            tool: tool.into(),
            data: None,
            error: Some(error),
            metadata,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Per-execution results, one slot per step index. Each slot is written at
/// most once; a later write for the same index is ignored.
#[derive(Debug, Clone)]
pub struct ResultStore {
    slots: Vec<Option<ToolResult>>,
}

impl ResultStore {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns false when the index is out of range or already recorded.
    pub fn record(&mut self, index: usize, result: ToolResult) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&ToolResult> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_recorded(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn recorded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Results in step order, or `None` while any slot is still empty.
    pub fn into_ordered(self) -> Option<Vec<ToolResult>> {
        self.slots.into_iter().collect()
    }
}
