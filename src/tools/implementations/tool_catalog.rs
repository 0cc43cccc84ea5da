// Tool catalog collaborator - tool descriptions and role availability
//
// Shares the profile table with the orchestrator, which rebuilds its
// registries after a confirmed change through this collaborator.

use crate::tools::profiles::{Profile, ToolProfiles};
use crate::tools::registry::Collaborator;
use crate::tools::types::{Capability, ToolOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Profile table shared between the orchestrator and the catalog tools
pub type SharedProfiles = Arc<RwLock<ToolProfiles>>;

pub struct ToolCatalogManager {
    profiles: SharedProfiles,
    profile: Profile,
}

impl ToolCatalogManager {
    /// Manager acting on `profile`'s tool set
    pub fn new(profiles: SharedProfiles, profile: Profile) -> Self {
        Self { profiles, profile }
    }
}

fn required<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input[key]
        .as_str()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("Missing {} parameter", key))
}

fn listing(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[async_trait]
impl Collaborator for ToolCatalogManager {
    fn capability(&self) -> Capability {
        Capability::ToolCatalog
    }

    async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
        match tool_name {
            "get_tool_description" => {
                let name = required(input, "tool_name")?;
                let profiles = self.profiles.read().await;
                let spec = profiles.catalog().resolve(name)?;
                Ok(ToolOutput::report(format!(
                    "Tool '{}' ({}): {}",
                    spec.name,
                    spec.kind_label(),
                    spec.description
                ))
                .with_data(json!({
                    "name": spec.name,
                    "description": spec.description,
                    "mutating": spec.mutating,
                })))
            }
            "update_tool_description" => {
                let name = required(input, "tool_name")?;
                let description = required(input, "description")?;
                self.profiles.write().await.set_description(name, description)?;
                Ok(ToolOutput::report(format!("Description of tool '{}' updated.", name)).affecting(name))
            }
            "list_available_tools" => {
                let profiles = self.profiles.read().await;
                let enabled = profiles.tools_for(self.profile);
                let available = profiles.available_but_disabled(self.profile);
                Ok(ToolOutput::report(format!(
                    "Tools enabled for {}: {}\nAvailable to enable: {}",
                    self.profile,
                    listing(&enabled),
                    listing(&available)
                ))
                .with_data(json!({"enabled": enabled, "available": available})))
            }
            "set_tool_availability" => {
                let name = required(input, "tool_name")?;
                let enable = input["enable"].as_bool().context("Missing enable parameter")?;
                let change = self
                    .profiles
                    .write()
                    .await
                    .set_tool_availability(self.profile, name, enable)?;
                Ok(ToolOutput::report(change.describe(name, self.profile)).affecting(name))
            }
            other => bail!("Unsupported tool '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::builtin_registry;

    fn manager(profile: Profile) -> (ToolCatalogManager, SharedProfiles) {
        let profiles = Arc::new(RwLock::new(ToolProfiles::new(builtin_registry().unwrap())));
        (ToolCatalogManager::new(profiles.clone(), profile), profiles)
    }

    #[tokio::test]
    async fn test_description_read_and_replaced() {
        let (manager, profiles) = manager(Profile::Developer);

        let output = manager
            .invoke("get_tool_description", &json!({"tool_name": "update_jira_issue"}))
            .await
            .unwrap();
        assert!(output.report.starts_with("Tool 'update_jira_issue' (mutating): "));
        assert_eq!(output.data["mutating"], true);

        let output = manager
            .invoke(
                "update_tool_description",
                &json!({"tool_name": "update_jira_issue", "description": "Edit an issue"}),
            )
            .await
            .unwrap();
        assert_eq!(output.affected_record.as_deref(), Some("update_jira_issue"));
        assert_eq!(profiles.read().await.description("update_jira_issue").unwrap(), "Edit an issue");
    }

    #[tokio::test]
    async fn test_availability_follows_active_profile() {
        let (manager, profiles) = manager(Profile::RequirementsEngineer);

        let output = manager
            .invoke("set_tool_availability", &json!({"tool_name": "add_jira_comment", "enable": true}))
            .await
            .unwrap();
        assert_eq!(output.report, "Tool 'add_jira_comment' enabled for requirements-engineer.");
        assert!(profiles
            .read()
            .await
            .tools_for(Profile::RequirementsEngineer)
            .contains(&"add_jira_comment".to_string()));
        // Other roles untouched
        assert!(!profiles
            .read()
            .await
            .tools_for(Profile::Developer)
            .contains(&"delete_confluence_page".to_string()));

        let listed = manager.invoke("list_available_tools", &json!({})).await.unwrap();
        let enabled = listed.data["enabled"].clone();
        assert!(enabled.as_array().unwrap().contains(&json!("add_jira_comment")));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_missing_flag() {
        let (manager, _) = manager(Profile::Developer);
        let err = manager
            .invoke("get_tool_description", &json!({"tool_name": "format_disk"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool 'format_disk'"));

        let err = manager
            .invoke("set_tool_availability", &json!({"tool_name": "add_jira_comment"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing enable parameter"));
    }
}
