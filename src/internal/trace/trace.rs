use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub const PLAN_START: &str = "plan_start";
pub const PLAN_END: &str = "plan_end";
pub const STEP_START: &str = "step_start";
pub const STEP_END: &str = "step_end";

pub const DEFAULT_TRACE_RETENTION: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub data: Option<serde_json::Value>,
}

impl Trace {
    pub fn plan(plan_id: &str, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            step: None,
            ts: Utc::now(),
            event_type: event_type.to_string(),
            data: Some(data),
        }
    }

    pub fn step(plan_id: &str, step: usize, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            step: Some(step),
            ts: Utc::now(),
            event_type: event_type.to_string(),
            data: Some(data),
        }
    }
}

/// Trace events for one execution, in recording order.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    plan_id: String,
    events: Vec<Trace>,
}

impl TraceLog {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            events: Vec::new(),
        }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn plan_event(&mut self, event_type: &str, data: serde_json::Value) {
        let trace = Trace::plan(&self.plan_id, event_type, data);
        self.events.push(trace);
    }

    pub fn step_event(&mut self, step: usize, event_type: &str, data: serde_json::Value) {
        let trace = Trace::step(&self.plan_id, step, event_type, data);
        self.events.push(trace);
    }

    pub fn into_events(self) -> Vec<Trace> {
        self.events
    }
}

/// Traces of recent executions keyed by plan id. Once `capacity` plans are
/// held, the oldest is evicted on insert.
#[derive(Debug, Clone)]
pub struct TraceStore {
    capacity: usize,
    order: VecDeque<String>,
    traces: HashMap<String, Vec<Trace>>,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_RETENTION)
    }
}

impl TraceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            traces: HashMap::new(),
        }
    }

    pub fn insert(&mut self, plan_id: impl Into<String>, traces: Vec<Trace>) {
        let plan_id = plan_id.into();
        if self.traces.insert(plan_id.clone(), traces).is_none() {
            self.order.push_back(plan_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.traces.remove(&oldest);
            }
        }
    }

    pub fn get(&self, plan_id: &str) -> Option<&[Trace]> {
        self.traces.get(plan_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trace_log_keeps_order() {
        let mut log = TraceLog::new("plan-1");
        log.plan_event(PLAN_START, json!({ "steps": 2 }));
        log.step_event(1, STEP_START, json!({ "tool": "facilities" }));
        log.step_event(1, STEP_END, json!({ "success": true }));

        let events = log.into_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].step, None);
        assert_eq!(events[1].step, Some(1));
        assert_eq!(events[2].event_type, STEP_END);
        assert!(events.iter().all(|e| e.plan_id == "plan-1"));
    }

    #[test]
    fn test_trace_store_evicts_oldest_plan() {
        let mut store = TraceStore::new(2);
        for plan_id in ["plan-a", "plan-b", "plan-c"] {
            store.insert(plan_id, vec![Trace::plan(plan_id, PLAN_START, json!({}))]);
        }

        assert_eq!(store.len(), 2);
        assert!(store.get("plan-a").is_none());
        assert_eq!(store.get("plan-c").unwrap()[0].plan_id, "plan-c");

        // replacing an entry does not take a second slot
        store.insert("plan-b", Vec::new());
        assert_eq!(store.len(), 2);
        assert!(store.get("plan-c").is_some());
        assert_eq!(store.get("plan-b").unwrap().len(), 0);
    }
}
