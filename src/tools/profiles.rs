// Role profiles - which tools each assistant role may use
//
// Defaults mirror the roles the assistant ships with. Availability can be
// toggled per role at runtime; toggling only touches tools that exist in
// the catalog.

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tools::registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Assistant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    RequirementsEngineer,
    ProductOwner,
    Developer,
    All,
}

impl Profile {
    pub fn name(&self) -> &'static str {
        match self {
            Profile::RequirementsEngineer => "requirements-engineer",
            Profile::ProductOwner => "product-owner",
            Profile::Developer => "developer",
            Profile::All => "all",
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::RequirementsEngineer
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "requirements-engineer" | "re" => Ok(Profile::RequirementsEngineer),
            "product-owner" | "po" => Ok(Profile::ProductOwner),
            "developer" | "dev" => Ok(Profile::Developer),
            "all" => Ok(Profile::All),
            other => Err(OrchestratorError::Config(format!("unknown profile '{}'", other))),
        }
    }
}

const REQUIREMENTS_ENGINEER_TOOLS: &[&str] = &[
    "get_current_time",
    "perform_google_search",
    "get_jira_issue_details",
    "get_jira_comments",
    "show_jira_issue",
    "get_jira_transitions",
    "get_jira_issue_links",
    "get_jira_subtasks",
    "get_confluence_page",
    "get_confluence_child_pages",
    "search_confluence_pages",
    "show_confluence_page",
    "create_confluence_page",
    "update_confluence_page",
    "delete_confluence_page",
    "add_requirement",
    "retrieve_similar_requirements",
    "update_requirement",
    "delete_requirement",
    "get_all_requirements",
    "add_or_update_requirement_node",
    "add_requirement_relationship",
    "get_requirement_relationships",
    "get_tool_description",
    "update_tool_description",
    "list_available_tools",
    "set_tool_availability",
];

const PRODUCT_OWNER_TOOLS: &[&str] = &[
    "create_jira_issue",
    "get_jira_issue_details",
    "update_jira_issue",
    "add_jira_comment",
    "get_jira_comments",
    "show_jira_issue",
    "get_jira_transitions",
    "transition_jira_issue",
    "add_requirement",
    "retrieve_similar_requirements",
    "update_requirement",
    "delete_requirement",
    "get_all_requirements",
    "add_acceptance_criterion",
    "retrieve_similar_acceptance_criteria",
    "update_acceptance_criterion",
    "delete_acceptance_criterion",
    "get_all_acceptance_criteria",
    "add_test_case",
    "retrieve_similar_test_cases",
    "update_test_case",
    "delete_test_case",
    "get_all_test_cases",
    "add_or_update_requirement_node",
    "add_requirement_relationship",
    "get_requirement_relationships",
    "get_tool_description",
    "update_tool_description",
    "list_available_tools",
    "set_tool_availability",
];

const DEVELOPER_TOOLS: &[&str] = &[
    "get_jira_issue_details",
    "update_jira_issue",
    "add_jira_comment",
    "get_jira_comments",
    "show_jira_issue",
    "get_jira_transitions",
    "transition_jira_issue",
    "create_jira_subtask",
    "get_jira_subtasks",
    "delete_jira_issue",
    "perform_google_search",
    "get_tool_description",
    "list_available_tools",
];

/// Result of toggling a tool for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityChange {
    Enabled,
    AlreadyEnabled,
    Disabled,
    NotEnabled,
}

impl AvailabilityChange {
    /// User-facing sentence for a change of `tool_name` under `profile`
    pub fn describe(&self, tool_name: &str, profile: Profile) -> String {
        match self {
            AvailabilityChange::Enabled => format!("Tool '{}' enabled for {}.", tool_name, profile),
            AvailabilityChange::AlreadyEnabled => {
                format!("Tool '{}' was already enabled for {}.", tool_name, profile)
            }
            AvailabilityChange::Disabled => format!("Tool '{}' disabled for {}.", tool_name, profile),
            AvailabilityChange::NotEnabled => format!("Tool '{}' was not enabled for {}.", tool_name, profile),
        }
    }
}

/// Per-profile tool enablement over a catalog
#[derive(Debug, Clone)]
pub struct ToolProfiles {
    catalog: ToolRegistry,
    enabled: BTreeMap<Profile, BTreeSet<String>>,
}

impl ToolProfiles {
    /// Default assignments over the given catalog
    pub fn new(catalog: ToolRegistry) -> Self {
        let mut enabled = BTreeMap::new();
        let defaults: [(Profile, &[&str]); 3] = [
            (Profile::RequirementsEngineer, REQUIREMENTS_ENGINEER_TOOLS),
            (Profile::ProductOwner, PRODUCT_OWNER_TOOLS),
            (Profile::Developer, DEVELOPER_TOOLS),
        ];
        for (profile, tools) in defaults {
            let set = tools
                .iter()
                .filter(|t| catalog.has_tool(t))
                .map(|t| t.to_string())
                .collect();
            enabled.insert(profile, set);
        }
        enabled.insert(Profile::All, catalog.tool_names().into_iter().collect());

        Self { catalog, enabled }
    }

    /// Tools enabled for a profile, sorted
    pub fn tools_for(&self, profile: Profile) -> Vec<String> {
        self.enabled
            .get(&profile)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Catalog tools not enabled for a profile
    pub fn available_but_disabled(&self, profile: Profile) -> Vec<String> {
        let enabled = self.enabled.get(&profile);
        self.catalog
            .tool_names()
            .into_iter()
            .filter(|name| !enabled.map_or(false, |set| set.contains(name)))
            .collect()
    }

    /// Enable or disable a catalog tool for a profile
    pub fn set_tool_availability(
        &mut self,
        profile: Profile,
        tool_name: &str,
        enable: bool,
    ) -> OrchestratorResult<AvailabilityChange> {
        self.catalog.resolve(tool_name)?;
        let set = self.enabled.entry(profile).or_default();

        let change = match (enable, set.contains(tool_name)) {
            (true, true) => AvailabilityChange::AlreadyEnabled,
            (true, false) => {
                set.insert(tool_name.to_string());
                AvailabilityChange::Enabled
            }
            (false, true) => {
                set.remove(tool_name);
                AvailabilityChange::Disabled
            }
            (false, false) => AvailabilityChange::NotEnabled,
        };
        info!(profile = %profile, tool = tool_name, change = ?change, "Tool availability changed");
        Ok(change)
    }

    /// Description of a catalog tool
    pub fn description(&self, tool_name: &str) -> OrchestratorResult<&str> {
        Ok(self.catalog.resolve(tool_name)?.description.as_str())
    }

    /// Replace the description of a catalog tool; its kind never changes
    pub fn set_description(&mut self, tool_name: &str, description: &str) -> OrchestratorResult<()> {
        let description = description.trim();
        if description.is_empty() {
            return Err(OrchestratorError::Config(format!(
                "description of '{}' cannot be empty",
                tool_name
            )));
        }
        let mut spec = self.catalog.resolve(tool_name)?.clone();
        spec.description = description.to_string();
        self.catalog.register(spec)?;
        info!(tool = tool_name, "Tool description updated");
        Ok(())
    }

    /// Registry restricted to a profile's enabled tools
    pub fn registry_for(&self, profile: Profile) -> ToolRegistry {
        match self.enabled.get(&profile) {
            Some(set) => self.catalog.scoped(set.iter().map(String::as_str)),
            None => ToolRegistry::new(),
        }
    }

    pub fn catalog(&self) -> &ToolRegistry {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::builtin_registry;

    fn profiles() -> ToolProfiles {
        ToolProfiles::new(builtin_registry().unwrap())
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("Product-Owner".parse::<Profile>().unwrap(), Profile::ProductOwner);
        assert_eq!("developer".parse::<Profile>().unwrap(), Profile::Developer);
        assert_eq!(
            "requirements_engineer".parse::<Profile>().unwrap(),
            Profile::RequirementsEngineer
        );
        assert!("tester".parse::<Profile>().is_err());
    }

    #[test]
    fn test_requirements_engineer_cannot_update_issues() {
        let registry = profiles().registry_for(Profile::RequirementsEngineer);
        assert!(registry.has_tool("get_jira_issue_details"));
        assert!(matches!(
            registry.resolve("update_jira_issue"),
            Err(OrchestratorError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_all_profile_has_full_catalog() {
        let p = profiles();
        assert_eq!(p.tools_for(Profile::All).len(), p.catalog().len());
        assert!(p.available_but_disabled(Profile::All).is_empty());
    }

    #[test]
    fn test_set_tool_availability_transitions() {
        let mut p = profiles();
        let re = Profile::RequirementsEngineer;

        assert!(p.available_but_disabled(re).contains(&"add_jira_comment".to_string()));
        assert_eq!(
            p.set_tool_availability(re, "add_jira_comment", true).unwrap(),
            AvailabilityChange::Enabled
        );
        assert_eq!(
            p.set_tool_availability(re, "add_jira_comment", true).unwrap(),
            AvailabilityChange::AlreadyEnabled
        );
        assert!(p.registry_for(re).has_tool("add_jira_comment"));

        assert_eq!(
            p.set_tool_availability(re, "add_jira_comment", false).unwrap(),
            AvailabilityChange::Disabled
        );
        assert_eq!(
            p.set_tool_availability(re, "add_jira_comment", false).unwrap(),
            AvailabilityChange::NotEnabled
        );
    }

    #[test]
    fn test_set_tool_availability_unknown_tool() {
        let mut p = profiles();
        assert!(matches!(
            p.set_tool_availability(Profile::Developer, "format_disk", true),
            Err(OrchestratorError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_set_description_reaches_profile_registries() {
        let mut p = profiles();
        p.set_description("get_jira_comments", "  Read the discussion of an issue ").unwrap();

        assert_eq!(p.description("get_jira_comments").unwrap(), "Read the discussion of an issue");
        let spec = p.registry_for(Profile::Developer).resolve("get_jira_comments").unwrap().clone();
        assert_eq!(spec.description, "Read the discussion of an issue");
        assert!(!spec.mutating);

        assert!(p.set_description("get_jira_comments", " ").is_err());
        assert!(matches!(
            p.set_description("format_disk", "x"),
            Err(OrchestratorError::UnknownTool { .. })
        ));
    }
}
