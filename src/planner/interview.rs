// User-story interview
//
// User Story -> Context -> Acceptance Criteria. The criteria step collects
// one criterion per reply until "done" (or an empty reply). "cancel"
// aborts at any step. The result is the parameter set for
// `create_jira_issue` with a wiki-markup description.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

const SUMMARY_MAX_CHARS: usize = 120;

/// Field currently being asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewStep {
    UserStory,
    Context,
    AcceptanceCriteria,
}

impl InterviewStep {
    /// Template key of the prompt for this step
    pub fn prompt_key(&self) -> &'static str {
        match self {
            InterviewStep::UserStory => "interview_user_story",
            InterviewStep::Context => "interview_context",
            InterviewStep::AcceptanceCriteria => "interview_acceptance_criteria",
        }
    }
}

/// What the interview needs next
#[derive(Debug, Clone, PartialEq)]
pub enum InterviewReply {
    /// Ask for `step`; `repeat` when the previous answer was unusable
    Ask { step: InterviewStep, repeat: bool },
    /// Another criterion was recorded; ask for the next one
    CriterionAdded { count: usize },
    Cancelled,
    /// All fields collected; parameters for `create_jira_issue`
    Complete(Map<String, Value>),
}

#[derive(Debug, Clone)]
pub struct UserStoryInterview {
    project_key: String,
    step: InterviewStep,
    user_story: String,
    context: String,
    criteria: Vec<String>,
}

impl UserStoryInterview {
    pub fn start(project_key: &str) -> (Self, InterviewReply) {
        let interview = Self {
            project_key: project_key.to_uppercase(),
            step: InterviewStep::UserStory,
            user_story: String::new(),
            context: String::new(),
            criteria: Vec::new(),
        };
        (
            interview,
            InterviewReply::Ask {
                step: InterviewStep::UserStory,
                repeat: false,
            },
        )
    }

    pub fn step(&self) -> InterviewStep {
        self.step
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// Feed one reply
    pub fn answer(&mut self, reply: &str) -> InterviewReply {
        let text = reply.trim();
        if text.eq_ignore_ascii_case("cancel") {
            return InterviewReply::Cancelled;
        }

        match self.step {
            InterviewStep::UserStory => {
                if text.is_empty() {
                    return self.ask(true);
                }
                self.user_story = text.to_string();
                self.step = InterviewStep::Context;
                self.ask(false)
            }
            InterviewStep::Context => {
                if text.is_empty() {
                    return self.ask(true);
                }
                self.context = text.to_string();
                self.step = InterviewStep::AcceptanceCriteria;
                self.ask(false)
            }
            InterviewStep::AcceptanceCriteria => {
                let finished = text.is_empty() || text.eq_ignore_ascii_case("done");
                match (finished, self.criteria.is_empty()) {
                    // At least one criterion is required
                    (true, true) => self.ask(true),
                    (true, false) => InterviewReply::Complete(self.issue_parameters()),
                    (false, _) => {
                        self.criteria.push(strip_list_marker(text).to_string());
                        InterviewReply::CriterionAdded {
                            count: self.criteria.len(),
                        }
                    }
                }
            }
        }
    }

    fn ask(&self, repeat: bool) -> InterviewReply {
        InterviewReply::Ask {
            step: self.step,
            repeat,
        }
    }

    fn issue_parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("project_key".into(), json!(self.project_key));
        params.insert("summary".into(), json!(summary_from(&self.user_story)));
        params.insert("description".into(), json!(self.wiki_description()));
        params.insert("issue_type".into(), json!("Story"));
        params
    }

    /// Description in Jira wiki markup
    pub fn wiki_description(&self) -> String {
        let criteria: Vec<String> = self.criteria.iter().map(|c| format!("# {}", c)).collect();
        format!(
            "h3. User Story\n{}\n\nh3. Context\n{}\n\nh3. Acceptance Criteria\n{}",
            self.user_story,
            self.context,
            criteria.join("\n")
        )
    }
}

fn summary_from(story: &str) -> String {
    let first_line = story.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= SUMMARY_MAX_CHARS {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

/// "- x", "* x", "1. x", "2) x"; a number must be followed by whitespace
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*#]+|\d+[.)])\s+").expect("valid list marker regex"));

fn strip_list_marker(text: &str) -> &str {
    let trimmed = text.trim();
    match LIST_MARKER.find(trimmed) {
        Some(marker) => &trimmed[marker.end()..],
        None => trimmed,
    }
}
