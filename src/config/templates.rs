// Response templates
//
// Everything the assistant says outside of tool reports comes from this
// table. `{name}` placeholders are substituted at render time; unknown
// placeholders are left as written.

use std::collections::BTreeMap;
use tracing::warn;

const DEFAULTS: &[(&str, &str)] = &[
    ("greeting", "Cerebra ready (profile: {profile}). Type /help for commands, /exit to quit."),
    ("confirm_prompt", "I am about to make this change:\n{preview}\nProceed? (yes/no)"),
    ("reprompt", "Please answer yes or no. Still waiting on:\n{preview}"),
    ("rejected", "Cancelled. {tool} was not executed and nothing was changed."),
    ("superseded", "The earlier {tool} request was replaced and not executed."),
    ("expired", "The pending {tool} request was discarded; nothing was changed."),
    ("confirmation_timeout", "The confirmation for {tool} timed out; nothing was changed."),
    ("no_pending", "There is nothing waiting for confirmation."),
    ("queue_dropped", "{count} further change(s) were not proposed because {tool} did not succeed."),
    (
        "outcome_unknown",
        "{tool} did not answer within {waited}. The change may still have been applied; check before retrying.",
    ),
    ("clarify", "I need a bit more information: {missing}."),
    (
        "clarify_action",
        "I did not understand that request. Try 'show PROJ-1' or 'search confluence for onboarding', or type /help.",
    ),
    ("unknown_tool", "'{tool}' is not available for the {profile} profile."),
    ("tool_failed", "{tool} failed: {cause}"),
    ("nothing_to_report", "Done. The tools returned nothing to report."),
    ("tentative_note", "Some statements are tentative; please verify them against the sources."),
    ("gap_note", "{count} statement(s) could not be traced to a source."),
    (
        "interview_user_story",
        "Let's write a user story for {project}. What is the user story? (As a ..., I want ..., so that ...)",
    ),
    ("interview_context", "What background or context should the team know?"),
    (
        "interview_acceptance_criteria",
        "List the acceptance criteria, one per message. Type 'done' when finished.",
    ),
    ("interview_repeat", "I need an answer for this step."),
    ("interview_criterion_added", "Criterion {count} noted. Add another or type 'done'."),
    ("interview_cancelled", "User story interview cancelled. Nothing was created."),
    ("session_ended", "Session ended."),
];

/// Template table with defaults and overrides
#[derive(Debug, Clone)]
pub struct ResponseTemplates {
    templates: BTreeMap<String, String>,
}

impl ResponseTemplates {
    /// Defaults with `overrides` applied; unknown keys are kept and warned about
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut templates = Self::default();
        for (key, text) in overrides {
            if !templates.templates.contains_key(key) {
                warn!(template = %key, "Template override has no default counterpart");
            }
            templates.templates.insert(key.clone(), text.clone());
        }
        templates
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Render `key` with `{name}` substitutions
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let Some(template) = self.templates.get(key) else {
            warn!(template = key, "Missing response template");
            return key.to_string();
        };
        vars.iter().fold(template.clone(), |text, (name, value)| {
            text.replace(&format!("{{{}}}", name), value)
        })
    }
}

impl Default for ResponseTemplates {
    fn default() -> Self {
        Self {
            templates: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
