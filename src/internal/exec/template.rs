//! Step parameter templates.
//!
//! A string parameter of the form `${step[N].data<path>}` is replaced by the
//! value found at `<path>` inside the data of step `N`. The path is a chain
//! of `.field` and `[index]` accessors and may contain one `.*` wildcard,
//! which maps the rest of the path over every element of an array and drops
//! elements where it does not resolve.

use crate::internal::exec::result::ResultStore;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{\s*step\[(\d+)\]\.data(.*?)\s*\}$").expect("template regex is valid")
});

// Whitespace is allowed on both sides inside the braces.
fn is_step_reference(raw: &str) -> bool {
    raw.strip_prefix("${")
        .is_some_and(|rest| rest.trim_start().starts_with("step["))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => write!(f, ".{}", name),
            Segment::Index(index) => write!(f, "[{}]", index),
            Segment::Wildcard => write!(f, ".*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub step: usize,
    pub path: Vec<Segment>,
}

impl Expression {
    /// `Ok(None)` for strings that are not step references.
    pub fn parse(raw: &str) -> Result<Option<Self>, TemplateError> {
        let trimmed = raw.trim();
        if !is_step_reference(trimmed) {
            return Ok(None);
        }

        let captures = EXPRESSION
            .captures(trimmed)
            .ok_or_else(|| TemplateError::syntax(raw, "expected ${step[N].data...}"))?;
        let step = captures[1]
            .parse::<usize>()
            .map_err(|_| TemplateError::syntax(raw, "step index out of range"))?;
        let path = parse_path(&captures[2]).map_err(|reason| TemplateError::syntax(raw, reason))?;

        Ok(Some(Self { step, path }))
    }
}

fn parse_path(raw: &str) -> Result<Vec<Segment>, &'static str> {
    let chars: Vec<char> = raw.chars().collect();
    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                if chars.get(pos) == Some(&'*') {
                    if segments.contains(&Segment::Wildcard) {
                        return Err("only one wildcard segment is allowed");
                    }
                    segments.push(Segment::Wildcard);
                    pos += 1;
                    continue;
                }
                let start = pos;
                while pos < chars.len() && !matches!(chars[pos], '.' | '[' | ']') {
                    pos += 1;
                }
                if start == pos {
                    return Err("empty field name");
                }
                let name: String = chars[start..pos].iter().collect();
                segments.push(Segment::Field(name.trim().to_string()));
            }
            '[' => {
                let start = pos + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|offset| start + offset)
                    .ok_or("unclosed index accessor")?;
                let digits: String = chars[start..end].iter().collect();
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| "index accessor must be a non-negative integer")?;
                segments.push(Segment::Index(index));
                pos = end + 1;
            }
            _ => return Err("path segments must start with '.' or '['"),
        }
    }

    Ok(segments)
}

fn render_path(segments: &[Segment]) -> String {
    segments.iter().map(ToString::to_string).collect()
}

/// Resolves templates against the results recorded so far.
pub struct TemplateResolver<'a> {
    store: &'a ResultStore,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(store: &'a ResultStore) -> Self {
        Self { store }
    }

    pub fn resolve_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, TemplateError> {
        params
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(value)?)))
            .collect()
    }

    pub fn resolve_value(&self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(raw) => match Expression::parse(raw)? {
                Some(expression) => self.evaluate(&expression),
                None => Ok(value.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => self.resolve_params(map).map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    pub fn evaluate(&self, expression: &Expression) -> Result<Value, TemplateError> {
        let step = expression.step;
        let result = self
            .store
            .get(step)
            .ok_or(TemplateError::StepNotFound(step))?;

        if !result.success {
            return Err(TemplateError::StepFailed {
                step,
                reason: result
                    .error_message()
                    .unwrap_or("no error reported")
                    .to_string(),
            });
        }

        let data = result.data.as_ref().unwrap_or(&Value::Null);
        walk(step, data, &expression.path, 0)
    }
}

// `offset` is how many segments of the full path precede `segments`, for error messages.
fn walk(step: usize, root: &Value, segments: &[Segment], offset: usize) -> Result<Value, TemplateError> {
    let mut current = root;

    for (i, segment) in segments.iter().enumerate() {
        let next = match segment {
            Segment::Field(name) => current.as_object().and_then(|map| map.get(name)),
            Segment::Index(index) => current.as_array().and_then(|items| items.get(*index)),
            Segment::Wildcard => {
                let items = current.as_array().ok_or_else(|| TemplateError::NonArray {
                    step,
                    path: render_path(&segments[..i]),
                })?;
                let rest = &segments[i + 1..];
                let collected = items
                    .iter()
                    .filter_map(|item| walk(step, item, rest, offset + i + 1).ok())
                    .collect();
                return Ok(Value::Array(collected));
            }
        };

        current = next.ok_or_else(|| TemplateError::UndefinedProperty {
            step,
            segment: segment.to_string(),
            position: offset + i,
        })?;
    }

    Ok(current.clone())
}

/// Step indices referenced by any template inside `params`. Malformed
/// templates are skipped here and reported during resolution.
pub fn referenced_steps(params: &Map<String, Value>) -> Vec<usize> {
    fn collect(value: &Value, out: &mut Vec<usize>) {
        match value {
            Value::String(raw) => {
                if let Ok(Some(expression)) = Expression::parse(raw) {
                    if !out.contains(&expression.step) {
                        out.push(expression.step);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            Value::Object(map) => map.values().for_each(|item| collect(item, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    params.values().for_each(|value| collect(value, &mut out));
    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Invalid template expression {expression:?}: {reason}")]
    Syntax { expression: String, reason: String },
    #[error("Step {0} not found")]
    StepNotFound(usize),
    #[error("Step {step} failed: {reason}")]
    StepFailed { step: usize, reason: String },
    #[error("Cannot read undefined property '{segment}' of step {step} data (path segment {position})")]
    UndefinedProperty {
        step: usize,
        segment: String,
        position: usize,
    },
    #[error("Wildcard applied to non-array value at step[{step}].data{path}")]
    NonArray { step: usize, path: String },
}

impl TemplateError {
    fn syntax(expression: &str, reason: impl Into<String>) -> Self {
        Self::Syntax {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::exec::result::{ErrorInfo, ResultMetadata, ToolResult};
    use serde_json::json;

    fn store_with(results: Vec<ToolResult>, len: usize) -> ResultStore {
        let mut store = ResultStore::new(len);
        for (index, result) in results.into_iter().enumerate() {
            store.record(index, result);
        }
        store
    }

    fn ok(data: Value) -> ToolResult {
        ToolResult::success("shipments", data, ResultMetadata::new(1, 0))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_paths() {
        let expr = Expression::parse("${step[2].data[0].facility.id}").unwrap().unwrap();
        assert_eq!(expr.step, 2);
        assert_eq!(
            expr.path,
            vec![
                Segment::Index(0),
                Segment::Field("facility".into()),
                Segment::Field("id".into())
            ]
        );

        let expr = Expression::parse("${step[0].data.*.id}").unwrap().unwrap();
        assert_eq!(expr.path, vec![Segment::Wildcard, Segment::Field("id".into())]);

        let expr = Expression::parse("${step[0].data}").unwrap().unwrap();
        assert!(expr.path.is_empty());
    }

    #[test]
    fn test_whitespace_inside_braces_on_either_side() {
        let expected = Expression::parse("${step[0].data.id}").unwrap();
        assert!(expected.is_some());
        for raw in ["${ step[0].data.id}", "${step[0].data.id }", "${  step[0].data.id  }"] {
            assert_eq!(Expression::parse(raw).unwrap(), expected, "{}", raw);
        }

        let store = store_with(vec![ok(json!({ "id": "S1" }))], 1);
        let value = TemplateResolver::new(&store)
            .resolve_value(&json!("${ step[0].data.id }"))
            .unwrap();
        assert_eq!(value, json!("S1"));
    }

    #[test]
    fn test_non_templates_are_not_expressions() {
        assert_eq!(Expression::parse("shipments").unwrap(), None);
        assert_eq!(Expression::parse("${env.HOME}").unwrap(), None);
        assert_eq!(Expression::parse("total: ${step[0].data}").unwrap(), None);
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(matches!(
            Expression::parse("${step[0].result}"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Expression::parse("${step[0].data.*.items.*.id}"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Expression::parse("${step[0].data[x]}"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_wildcard_maps_field_over_array() {
        let store = store_with(
            vec![ok(json!([{ "id": "S1" }, { "id": "S2" }, { "id": "S3" }]))],
            2,
        );
        let resolved = TemplateResolver::new(&store)
            .resolve_params(&params(json!({ "shipment_ids": "${step[0].data.*.id}" })))
            .unwrap();
        assert_eq!(resolved["shipment_ids"], json!(["S1", "S2", "S3"]));
    }

    #[test]
    fn test_wildcard_drops_elements_without_field() {
        let store = store_with(vec![ok(json!([{ "id": "S1" }, { "code": 7 }, { "id": "S3" }]))], 1);
        let resolver = TemplateResolver::new(&store);
        assert_eq!(
            resolver.resolve_value(&json!("${step[0].data.*.id}")).unwrap(),
            json!(["S1", "S3"])
        );
        assert_eq!(
            resolver.resolve_value(&json!("${step[0].data.*.missing}")).unwrap(),
            json!([])
        );
    }

    #[test]
    fn test_wildcard_inside_nested_path() {
        let store = store_with(
            vec![ok(json!({
                "items": [
                    { "facility": { "id": "F1" } },
                    { "facility": {} },
                    { "facility": { "id": "F2" } }
                ]
            }))],
            1,
        );
        let value = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[0].data.items.*.facility.id}"))
            .unwrap();
        assert_eq!(value, json!(["F1", "F2"]));
    }

    #[test]
    fn test_nested_scalar_reference() {
        let store = store_with(vec![ok(json!([{ "facility": { "id": "F-9" } }]))], 1);
        let value = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[0].data[0].facility.id}"))
            .unwrap();
        assert_eq!(value, json!("F-9"));
    }

    #[test]
    fn test_multiple_templates_and_passthrough() {
        let store = store_with(
            vec![
                ok(json!([{ "id": "S1" }, { "id": "S2" }])),
                ok(json!({ "facility": { "id": "F1", "name": "North" } })),
            ],
            3,
        );
        let resolved = TemplateResolver::new(&store)
            .resolve_params(&params(json!({
                "ids": "${step[0].data.*.id}",
                "filter": {
                    "facility": "${step[1].data.facility.id}",
                    "names": ["${step[1].data.facility.name}", "literal"]
                },
                "limit": 25,
                "status": "rejected"
            })))
            .unwrap();

        assert_eq!(
            Value::Object(resolved),
            json!({
                "ids": ["S1", "S2"],
                "filter": { "facility": "F1", "names": ["North", "literal"] },
                "limit": 25,
                "status": "rejected"
            })
        );
    }

    #[test]
    fn test_missing_step_is_reported_first() {
        let store = ResultStore::new(3);
        let err = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[1].data.id}"))
            .unwrap_err();
        assert_eq!(err, TemplateError::StepNotFound(1));
        assert_eq!(err.to_string(), "Step 1 not found");

        let err = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[10].data}"))
            .unwrap_err();
        assert_eq!(err, TemplateError::StepNotFound(10));
    }

    #[test]
    fn test_failed_step_reference() {
        let failed = ToolResult::failure(
            "shipments",
            ErrorInfo::new("TOOL_ERROR", "upstream down"),
            ResultMetadata::new(1, 0),
        );
        let store = store_with(vec![failed], 1);
        let err = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[0].data.*.id}"))
            .unwrap_err();
        assert!(err.to_string().starts_with("Step 0 failed"));
    }

    #[test]
    fn test_undefined_property_names_segment() {
        let store = store_with(vec![ok(json!({ "facility": { "id": "F1" } }))], 1);
        let err = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[0].data.site.id}"))
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::UndefinedProperty {
                step: 0,
                segment: ".site".into(),
                position: 0
            }
        );
        assert!(err.to_string().contains("undefined property '.site'"));
    }

    #[test]
    fn test_wildcard_on_non_array() {
        let store = store_with(vec![ok(json!({ "facility": { "id": "F1" } }))], 1);
        let err = TemplateResolver::new(&store)
            .resolve_value(&json!("${step[0].data.facility.*.id}"))
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::NonArray {
                step: 0,
                path: ".facility".into()
            }
        );
        assert!(err.to_string().contains("non-array"));
    }

    #[test]
    fn test_referenced_steps() {
        let refs = referenced_steps(&params(json!({
            "a": "${step[2].data.id}",
            "b": { "c": ["${step[0].data}", "${step[2].data.name}"] },
            "d": "plain"
        })));
        assert_eq!(refs, vec![2, 0]);
        assert!(referenced_steps(&params(json!({ "limit": 5 }))).is_empty());
    }
}
