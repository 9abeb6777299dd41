use crate::internal::tools::{
    http::{InvokeTool, ResourceTool},
    spec::Tool,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, fs, path::Path, sync::Arc};

const DEFAULT_CONFIG_PATH: &str = "config/tools.json";
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
// tool name -> API resource
const DEFAULT_RESOURCES: &[(&str, &str)] = &[
    ("shipments", "shipments"),
    ("facilities", "facilities"),
    ("contaminants", "contaminants-detected"),
    ("inspections", "inspections"),
];

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Invoke,
    Resource,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ToolEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl ToolEntry {
    pub fn build(&self) -> Arc<dyn Tool> {
        match self.kind {
            ToolKind::Invoke => Arc::new(InvokeTool::new(&self.name, &self.url)),
            ToolKind::Resource => {
                let resource = self.resource.as_deref().unwrap_or(&self.name);
                Arc::new(ResourceTool::new(&self.name, &self.url, resource))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read tool registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid tool registry JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error accessing tool registry: {0}")]
    Http(String),
}

/// Tool directory handed to the engine at construction time.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[ToolEntry]) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.register_arc(entry.build());
        }
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.register_arc(Arc::new(tool))
    }

    // Re-registering a name replaces the previous tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Entries from `WM_TOOL_CONFIG` (or `config/tools.json`), falling back to
/// the default waste data resources.
pub fn load_tool_entries() -> Vec<ToolEntry> {
    let path = env::var("WM_TOOL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    match read_entries(Path::new(&path)) {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => default_entries(),
        Err(e) => {
            tracing::debug!("Using default tool registry ({}): {}", path, e);
            default_entries()
        }
    }
}

pub fn read_entries(path: &Path) -> Result<Vec<ToolEntry>, RegistryError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub fn default_entries() -> Vec<ToolEntry> {
    let base_url = env::var("WM_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
    DEFAULT_RESOURCES
        .iter()
        .map(|(name, resource)| ToolEntry {
            name: (*name).to_string(),
            url: base_url.clone(),
            kind: ToolKind::Resource,
            resource: Some((*resource).to_string()),
        })
        .collect()
}

pub async fn fetch_remote_entries(base_url: &str) -> Result<Vec<ToolEntry>, RegistryError> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/tools", base_url.trim_end_matches('/')))
        .send()
        .await
        .map_err(|e| RegistryError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RegistryError::Http(format!(
            "Registry responded with status {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| RegistryError::Http(e.to_string()))
}

/// Local entries plus, when `WM_TOOL_REGISTRY_URL` is set, remote entries
/// for names not configured locally.
pub async fn load_tool_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::from_entries(&load_tool_entries());

    if let Ok(base_url) = env::var("WM_TOOL_REGISTRY_URL") {
        match fetch_remote_entries(&base_url).await {
            Ok(remote) => merge_remote(&mut registry, &remote),
            Err(e) => {
                tracing::warn!("Failed to fetch tool registry from {}: {}", base_url, e);
            }
        }
    }

    registry
}

// Local configuration wins over the remote directory.
fn merge_remote(registry: &mut ToolRegistry, remote: &[ToolEntry]) {
    for entry in remote {
        if registry.contains(&entry.name) {
            tracing::debug!("Keeping local tool {} over remote entry", entry.name);
            continue;
        }
        registry.register_arc(entry.build());
    }
}
