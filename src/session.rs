// Conversation session - ordered (utterance, action, result) history
//
// Owned by one orchestrator. Besides the protocol it tracks the most
// recently referenced issue key and page id for pronoun resolution.

use crate::tools::types::{ToolCall, ToolOutput};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static ISSUE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Z0-9]+-\d+\b").expect("valid issue key regex"));

/// What the orchestrator did with an utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionAction {
    /// Read-only calls executed immediately
    Executed { calls: Vec<ToolCall> },
    /// Mutating call waiting for confirmation
    Proposed { call: ToolCall },
    /// Confirmed mutating call (plus its viewer call) executed
    Confirmed { call: ToolCall },
    Rejected { call: ToolCall },
    /// Confirmed call that did not answer in time; it may still complete
    OutcomeUnknown { call: ToolCall },
    /// Superseded, timed out or discarded at session end
    Expired { call: ToolCall },
    Reprompted,
    Clarification { missing: Vec<String> },
    Interview,
    Protocol,
    Failed,
}

impl SessionAction {
    fn describe(&self) -> String {
        let list = |calls: &[ToolCall]| {
            calls
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        };
        match self {
            SessionAction::Executed { calls } => format!("executed {}", list(calls)),
            SessionAction::Proposed { call } => format!("proposed {}", call),
            SessionAction::Confirmed { call } => format!("confirmed {}", call),
            SessionAction::Rejected { call } => format!("rejected {}", call),
            SessionAction::Expired { call } => format!("expired {}", call),
            SessionAction::OutcomeUnknown { call } => format!("outcome unknown {}", call),
            SessionAction::Reprompted => "asked for confirmation again".to_string(),
            SessionAction::Clarification { missing } => {
                format!("asked for {}", missing.join(", "))
            }
            SessionAction::Interview => "user story interview".to_string(),
            SessionAction::Protocol => "session protocol".to_string(),
            SessionAction::Failed => "failed".to_string(),
        }
    }

    fn calls(&self) -> Vec<&ToolCall> {
        match self {
            SessionAction::Executed { calls } => calls.iter().collect(),
            SessionAction::Proposed { call }
            | SessionAction::Confirmed { call }
            | SessionAction::Rejected { call }
            | SessionAction::OutcomeUnknown { call }
            | SessionAction::Expired { call } => vec![call],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub turn: usize,
    pub utterance: String,
    pub action: SessionAction,
    pub result: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Session {
    entries: Vec<SessionEntry>,
    last_issue: Option<String>,
    last_page: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and update the remembered references
    pub fn record(&mut self, turn: usize, utterance: &str, action: SessionAction, result: &str) {
        self.remember_from_text(utterance);
        for call in action.calls() {
            self.remember_from_call(call);
        }
        self.entries.push(SessionEntry {
            turn,
            utterance: utterance.to_string(),
            action,
            result: result.to_string(),
            at: Utc::now(),
        });
    }

    /// Remember records created or changed by a tool
    pub fn remember_output(&mut self, output: &ToolOutput) {
        let Some(id) = &output.affected_record else {
            return;
        };
        if output.tool_name.contains("jira") {
            self.last_issue = Some(id.clone());
        } else if output.tool_name.contains("confluence") {
            self.last_page = Some(id.clone());
        }
    }

    pub fn last_issue(&self) -> Option<&str> {
        self.last_issue.as_deref()
    }

    pub fn last_page(&self) -> Option<&str> {
        self.last_page.as_deref()
    }

    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Numbered protocol of the conversation so far
    pub fn protocol(&self) -> String {
        if self.entries.is_empty() {
            return "Session protocol: nothing recorded yet.".to_string();
        }
        let mut lines = vec![format!("Session protocol ({} entries):", self.entries.len())];
        for (i, entry) in self.entries.iter().enumerate() {
            lines.push(format!(
                "{}. [{}] {}",
                i + 1,
                entry.at.format("%H:%M:%S"),
                entry.utterance
            ));
            lines.push(format!("   action: {}", entry.action.describe()));
            if !entry.result.is_empty() {
                let first = entry.result.lines().next().unwrap_or_default();
                lines.push(format!("   result: {}", first));
            }
        }
        lines.join("\n")
    }

    fn remember_from_text(&mut self, text: &str) {
        // Requirement store ids share the key shape
        let key = ISSUE_KEY
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|k| !["REQ-", "AC-", "TC-"].iter().any(|p| k.starts_with(p)))
            .last();
        if let Some(key) = key {
            self.last_issue = Some(key.to_string());
        }
    }

    fn remember_from_call(&mut self, call: &ToolCall) {
        for param in ["issue_id", "parent_issue_id"] {
            if let Some(key) = call.param_str(param) {
                self.last_issue = Some(key.to_string());
            }
        }
        if let Some(page) = call.param_str("page_id") {
            self.last_page = Some(page.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::builtin_registry;
    use serde_json::{json, Map};

    fn details_call(key: &str) -> ToolCall {
        let registry = builtin_registry().unwrap();
        let mut params = Map::new();
        params.insert("issue_id".into(), json!(key));
        ToolCall::new("call_1_0".into(), registry.resolve("get_jira_issue_details").unwrap(), params)
    }

    #[test]
    fn test_remembers_last_issue_from_calls() {
        let mut session = Session::new();
        session.record(
            1,
            "show PROJ-1",
            SessionAction::Executed { calls: vec![details_call("PROJ-1")] },
            "Issue PROJ-1: ...",
        );
        assert_eq!(session.last_issue(), Some("PROJ-1"));
        assert!(session.last_page().is_none());
    }

    #[test]
    fn test_remembers_created_records() {
        let mut session = Session::new();
        let mut output = ToolOutput::report("Page created").affecting("9001");
        output.tool_name = "create_confluence_page".into();
        session.remember_output(&output);
        assert_eq!(session.last_page(), Some("9001"));
    }

    #[test]
    fn test_protocol_lists_entries_in_order() {
        let mut session = Session::new();
        session.record(1, "show PROJ-1", SessionAction::Executed { calls: vec![details_call("PROJ-1")] }, "Issue PROJ-1:\n  Summary: X");
        session.record(2, "protocol", SessionAction::Protocol, "");

        let protocol = session.protocol();
        let lines: Vec<&str> = protocol.lines().collect();
        assert_eq!(lines[0], "Session protocol (2 entries):");
        assert!(lines[1].ends_with("show PROJ-1"));
        assert_eq!(lines[2], "   action: executed get_jira_issue_details(issue_id: PROJ-1)");
        assert_eq!(lines[3], "   result: Issue PROJ-1:");
        assert!(lines[4].ends_with("protocol"));
    }

    #[test]
    fn test_empty_protocol() {
        assert_eq!(Session::new().protocol(), "Session protocol: nothing recorded yet.");
    }
}
