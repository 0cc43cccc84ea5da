// Tool registry and collaborator trait definition
//
// The registry declares which operations exist and whether they mutate
// external state; collaborators implement the operations of one capability.

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tools::types::{Capability, ToolOutput, ToolSpec};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Collaborator trait - one implementation per external capability
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Capability served by this collaborator
    fn capability(&self) -> Capability;

    /// Invoke one of the capability's tools with its JSON parameters
    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput>;
}

/// Registry of declared tools
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    ///
    /// Identical re-registration is a no-op. A different `mutating` flag for
    /// an existing name fails; a changed description or schema replaces the
    /// previous one.
    pub fn register(&mut self, spec: ToolSpec) -> OrchestratorResult<()> {
        if let Some(existing) = self.tools.get(&spec.name) {
            if existing.mutating != spec.mutating {
                return Err(OrchestratorError::ConflictingToolDefinition {
                    name: spec.name.clone(),
                    existing: existing.kind_label(),
                    requested: spec.kind_label(),
                });
            }
            if *existing == spec {
                return Ok(());
            }
            debug!(tool = %spec.name, "Replacing tool description/schema");
        }
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Resolve a tool by name
    pub fn resolve(&self, name: &str) -> OrchestratorResult<&ToolSpec> {
        self.tools
            .get(name)
            .ok_or_else(|| OrchestratorError::unknown_tool(name))
    }

    /// Check if tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// All tool specs, sorted by name
    pub fn specs(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<&ToolSpec> = self.tools.values().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Registry restricted to the given tool names
    pub fn scoped<'a>(&self, enabled: impl IntoIterator<Item = &'a str>) -> Self {
        let tools = enabled
            .into_iter()
            .filter_map(|name| self.tools.get(name).map(|s| (name.to_string(), s.clone())))
            .collect();
        Self { tools }
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
