//! Tool registry and the built-in tool suite.
//!
//! Tools describe themselves (name, description, JSON-schema parameters)
//! and execute with a raw JSON argument string; the registry only routes.
//! Argument validation is each tool's own business.

pub mod alarm;
pub mod memo;
pub mod music;
pub mod timer;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ChatterboxError, ChatterboxResult};
use crate::llm::ToolDefinition;

/// A callable tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the registry.
    fn name(&self) -> &str;
    /// Human description shown to the model.
    fn description(&self) -> &str;
    /// JSON schema of the parameters object.
    fn parameters(&self) -> serde_json::Value;
    /// Runs the tool with a raw JSON argument string.
    async fn execute(&self, args: &str) -> ChatterboxResult<String>;
}

/// Name → tool map. Registration is last-writer-wins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous tool of the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            log::warn!("[Tools] Re-registered {name}, previous tool replaced");
        } else {
            log::debug!("[Tools] Registered {name}");
        }
    }

    /// Looks up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Definitions of every registered tool (order unspecified).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Dispatches one call. The argument JSON is passed through untouched.
    pub async fn execute(&self, name: &str, args: &str) -> ChatterboxResult<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| ChatterboxError::UnknownTool(name.to_string()))?;
        tool.execute(args).await
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

// ─── State-file persistence ─────────────────────────────────────────────────

/// Loads a JSON array state file, returning empty on absence or corruption.
pub(crate) fn load_records<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("[Tools] State file {} unreadable: {e}", path.display());
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

/// Rewrites a JSON array state file atomically (temp file + rename).
pub(crate) fn save_records<T: Serialize>(path: &Path, records: &[T]) -> ChatterboxResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let contents = serde_json::to_string_pretty(records)?;
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
