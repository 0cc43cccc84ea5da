// Error taxonomy for the orchestration core
//
// Library code returns `OrchestratorError` so callers can branch on the
// failure kind (clarify vs. surface vs. withhold). Collaborators and the
// binary use anyhow and get folded into `ToolExecutionError` at the
// engine boundary.
//
// The helpers at the bottom format actionable messages for the CLI.

use thiserror::Error;

/// Errors produced by the registry, planner, gate, engine and attributor
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Tool name not registered (or not enabled for the active profile)
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Same tool name registered twice with a different mutating flag
    #[error("conflicting definition for tool '{name}': already registered as {existing}, got {requested}")]
    ConflictingToolDefinition {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    /// Required parameters could not be determined from the utterance
    #[error("ambiguous request, missing: {}", missing.join(", "))]
    AmbiguousIntent { missing: Vec<String> },

    /// A collaborator failed while executing a tool call
    #[error("tool '{tool_name}' failed: {cause}")]
    ToolExecutionError { tool_name: String, cause: String },

    /// A confirmed call did not answer in time; it was left running
    #[error("no answer from '{tool_name}' within {waited}; the change may still be applied")]
    OutcomeUnknown { tool_name: String, waited: String },

    /// Confirmation arrived after the proposal was superseded or timed out
    #[error("confirmation for '{tool_name}' expired")]
    ConfirmationExpired { tool_name: String },

    /// Reply or accept/reject with nothing awaiting confirmation
    #[error("no pending confirmation")]
    NoPendingConfirmation,

    /// A factual clause without any supporting record
    #[error("no source record supports: \"{clause}\"")]
    AttributionGap { clause: String },

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    pub fn execution(tool_name: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::ToolExecutionError {
            tool_name: tool_name.into(),
            cause: cause.to_string(),
        }
    }

    /// Clarification turns are not shown to the user as errors
    pub fn is_clarification(&self) -> bool {
        matches!(self, Self::AmbiguousIntent { .. })
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Format a missing-credentials error with the variables to set
pub fn missing_credentials_error(service: &str, variables: &[&str]) -> String {
    let exports: String = variables
        .iter()
        .map(|v| format!("   \x1b[36mexport {}=...\x1b[0m\n", v))
        .collect();
    format!(
        "{} configuration ({}) missing\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Add a [{}] section to ~/.cerebra/config.toml\n\n\
        2. Or set environment variables:\n\
        {}",
        service,
        variables.join(", "),
        service.to_lowercase(),
        exports
    )
}

/// Format a config parse error with helpful suggestions
pub fn config_parse_error(error: &str) -> String {
    format!(
        "Failed to parse config file\n\n\
        \x1b[1;33mError:\x1b[0m {}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check config file syntax:\n\
           \x1b[36mcat ~/.cerebra/config.toml\x1b[0m\n\n\
        2. Common mistakes:\n\
           • Missing quotes around strings\n\
           • Unclosed brackets []\n\
           • Unknown profile name (use requirements-engineer, product-owner, developer or all)",
        error
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_intent_lists_missing_fields() {
        let err = OrchestratorError::AmbiguousIntent {
            missing: vec!["issue_id".to_string(), "summary".to_string()],
        };
        assert_eq!(err.to_string(), "ambiguous request, missing: issue_id, summary");
        assert!(err.is_clarification());
    }

    #[test]
    fn test_execution_error_names_tool() {
        let err = OrchestratorError::execution("update_jira_issue", "HTTP 500");
        assert_eq!(err.to_string(), "tool 'update_jira_issue' failed: HTTP 500");
        assert!(!err.is_clarification());
    }

    #[test]
    fn test_missing_credentials_lists_variables() {
        let msg = missing_credentials_error("Jira", &["JIRA_INSTANCE_URL", "JIRA_EMAIL"]);
        assert!(msg.contains("export JIRA_INSTANCE_URL"));
        assert!(msg.contains("[jira]"));
    }
}
