use crate::internal::tools::spec::{Tool, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    args: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

/// Tool served over the invoke protocol: `POST <url>/invoke/<name>`.
#[derive(Debug, Clone)]
pub struct InvokeTool {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl InvokeTool {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_client(name, url, reqwest::Client::new())
    }

    pub fn with_client(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Tool for InvokeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Remote tool reached through the invoke protocol"
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let invoke_url = format!("{}/invoke/{}", self.url.trim_end_matches('/'), self.name);

        let response = self
            .client
            .post(invoke_url)
            .json(&InvokeRequest { args: params })
            .send()
            .await
            .map_err(|e| ToolError::Communication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ToolError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let invoke_response: InvokeResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Communication(e.to_string()))?;

        if let Some(error) = invoke_response.error {
            return Err(ToolError::Invocation(error));
        }

        Ok(invoke_response.result)
    }
}

/// Read-only accessor for one resource of the waste data API:
/// `GET <url>/api/<resource>?<scalar params>`.
#[derive(Debug, Clone)]
pub struct ResourceTool {
    name: String,
    url: String,
    resource: String,
    client: reqwest::Client,
}

impl ResourceTool {
    pub fn new(name: impl Into<String>, url: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            resource: resource.into(),
            client: reqwest::Client::new(),
        }
    }
}

// Arrays become comma-separated lists; nested objects are not expressible as query params.
fn query_pairs(params: &Map<String, Value>) -> Result<Vec<(String, String)>, ToolError> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(_) | Value::Number(_) => value.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Bool(_) | Value::Number(_) => Ok(item.to_string()),
                    _ => Err(ToolError::Validation(format!(
                        "parameter '{}' contains a non-scalar element",
                        key
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(","),
            Value::Object(_) => {
                return Err(ToolError::Validation(format!(
                    "parameter '{}' cannot be an object",
                    key
                )))
            }
        };
        pairs.push((key.clone(), rendered));
    }
    Ok(pairs)
}

#[async_trait]
impl Tool for ResourceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waste data API resource accessor"
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, ToolError> {
        let query = query_pairs(params)?;
        let resource_url = format!(
            "{}/api/{}",
            self.url.trim_end_matches('/'),
            self.resource.trim_start_matches('/')
        );

        let response = self
            .client
            .get(resource_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ToolError::Communication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ToolError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Communication(e.to_string()))?;

        // The API wraps payloads as `{ "success": .., "data": .. }`.
        match body.get_mut("data") {
            Some(data) => Ok(data.take()),
            None => Ok(body),
        }
    }
}
