// Intent planner
//
// Deterministic: the same utterance against the same history always yields
// the same calls with the same ids. Read-only calls are returned for
// immediate execution, mutating ones for the confirmation gate.

pub mod interview;
pub mod rules;

pub use interview::{InterviewReply, InterviewStep, UserStoryInterview};
pub use rules::{Draft, Intent, PlanContext};

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::session::Session;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::ToolCall;
use tracing::debug;

const INTERVIEW_TOOL: &str = "create_jira_issue";

/// Separators of compound requests, tried in order
const SEPARATORS: &[&str] = &["; then ", " and then ", "; "];

/// Calls planned for one utterance, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Read-only calls, safe to run now
    pub immediate: Vec<ToolCall>,
    /// Mutating calls, each needing its own confirmation
    pub gated: Vec<ToolCall>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.gated.is_empty()
    }

    pub fn has_mutations(&self) -> bool {
        !self.gated.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Calls(Plan),
    /// The user-story interview needs input (or was cancelled)
    Interview(InterviewReply),
    Protocol,
}

pub struct IntentPlanner {
    registry: ToolRegistry,
    interview: Option<UserStoryInterview>,
}

impl IntentPlanner {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            interview: None,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Plan against a new tool set from now on
    pub fn set_registry(&mut self, registry: ToolRegistry) {
        self.registry = registry;
    }

    pub fn interview_active(&self) -> bool {
        self.interview.is_some()
    }

    /// Project of the running interview
    pub fn interview_project(&self) -> Option<&str> {
        self.interview.as_ref().map(|i| i.project_key())
    }

    /// Plan an utterance at session turn `turn`
    pub fn plan(&mut self, utterance: &str, session: &Session, turn: usize) -> OrchestratorResult<PlanOutcome> {
        if let Some(interview) = self.interview.as_mut() {
            let reply = interview.answer(utterance);
            return match reply {
                InterviewReply::Complete(params) => {
                    self.interview = None;
                    let draft = Draft {
                        tool: INTERVIEW_TOOL.to_string(),
                        params,
                    };
                    self.build(vec![draft], turn).map(PlanOutcome::Calls)
                }
                InterviewReply::Cancelled => {
                    self.interview = None;
                    Ok(PlanOutcome::Interview(InterviewReply::Cancelled))
                }
                other => Ok(PlanOutcome::Interview(other)),
            };
        }

        let ctx = PlanContext {
            last_issue: session.last_issue(),
            last_page: session.last_page(),
        };
        let (rule, intent) = compound(utterance, &ctx)
            .map(|drafts| ("compound", Intent::Calls(drafts)))
            .or_else(|| rules::match_intent(utterance, &ctx))
            .ok_or_else(|| OrchestratorError::AmbiguousIntent {
                missing: vec!["action".to_string()],
            })?;
        debug!(rule, "Utterance matched");

        match intent {
            Intent::Protocol => Ok(PlanOutcome::Protocol),
            Intent::StartInterview { project } => {
                // The interview ends in an issue creation the profile must allow
                self.registry.resolve(INTERVIEW_TOOL)?;
                let project = project.ok_or_else(|| OrchestratorError::AmbiguousIntent {
                    missing: vec!["project_key".to_string()],
                })?;
                let (interview, first) = UserStoryInterview::start(&project);
                self.interview = Some(interview);
                Ok(PlanOutcome::Interview(first))
            }
            Intent::Calls(drafts) => self.build(drafts, turn).map(PlanOutcome::Calls),
        }
    }

    /// Abort a running interview
    pub fn cancel_interview(&mut self) -> bool {
        self.interview.take().is_some()
    }

    fn build(&self, drafts: Vec<Draft>, turn: usize) -> OrchestratorResult<Plan> {
        let mut missing: Vec<String> = Vec::new();
        let mut calls = Vec::with_capacity(drafts.len());

        for (index, draft) in drafts.into_iter().enumerate() {
            let spec = self.registry.resolve(&draft.tool)?;
            for field in spec.input_schema.missing_required(&draft.params) {
                if !missing.contains(&field) {
                    missing.push(field);
                }
            }
            calls.push(ToolCall::new(ToolCall::call_id(turn, index), spec, draft.params));
        }

        if !missing.is_empty() {
            return Err(OrchestratorError::AmbiguousIntent { missing });
        }

        let (gated, immediate) = calls.into_iter().partition(|c| c.mutating);
        Ok(Plan { immediate, gated })
    }
}

/// Drafts of a compound request whose every part is a plain tool request
///
/// A separator inside a quoted value leaves a part no rule matches, so
/// such utterances fall through to whole-utterance matching.
fn compound(utterance: &str, ctx: &PlanContext) -> Option<Vec<Draft>> {
    SEPARATORS.iter().find_map(|separator| {
        let parts: Vec<&str> = utterance
            .split(separator)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 2 {
            return None;
        }
        let mut drafts = Vec::new();
        for part in parts {
            match rules::match_intent(part, ctx)? {
                (_, Intent::Calls(part_drafts)) => drafts.extend(part_drafts),
                _ => return None,
            }
        }
        Some(drafts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionAction;
    use crate::tools::catalog::builtin_registry;
    use crate::tools::profiles::{Profile, ToolProfiles};

    fn planner() -> IntentPlanner {
        IntentPlanner::new(builtin_registry().unwrap())
    }

    fn calls(outcome: PlanOutcome) -> Plan {
        match outcome {
            PlanOutcome::Calls(plan) => plan,
            other => panic!("expected calls, got {:?}", other),
        }
    }

    #[test]
    fn test_update_is_gated() {
        let plan = calls(
            planner()
                .plan("update summary of ISSUE-1 to 'X'", &Session::new(), 1)
                .unwrap(),
        );
        assert!(plan.immediate.is_empty());
        assert_eq!(plan.gated.len(), 1);
        let call = &plan.gated[0];
        assert_eq!(call.id, "call_1_0");
        assert!(call.mutating);
        assert_eq!(call.param_str("issue_id"), Some("ISSUE-1"));
        assert_eq!(call.param_str("summary"), Some("X"));
    }

    #[test]
    fn test_two_reads_are_immediate() {
        let plan = calls(planner().plan("show ISSUE-1 and ISSUE-2", &Session::new(), 4).unwrap());
        let ids: Vec<&str> = plan.immediate.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_4_0", "call_4_1"]);
        assert!(!plan.has_mutations());
    }

    #[test]
    fn test_compound_request_splits_reads_and_mutations() {
        let plan = calls(
            planner()
                .plan(
                    "update summary of ISSUE-1 to 'X'; add comment to ISSUE-1 saying 'renamed'",
                    &Session::new(),
                    3,
                )
                .unwrap(),
        );
        let names: Vec<&str> = plan.gated.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["update_jira_issue", "add_jira_comment"]);
        assert_eq!(plan.gated[1].id, "call_3_1");

        let plan = calls(
            planner()
                .plan("show ISSUE-1 and then move ISSUE-1 to 'Done'", &Session::new(), 1)
                .unwrap(),
        );
        assert_eq!(plan.immediate.len(), 1);
        assert_eq!(plan.gated[0].name, "transition_jira_issue");
    }

    #[test]
    fn test_separator_inside_quotes_stays_one_request() {
        let plan = calls(
            planner()
                .plan("add comment to ISSUE-1 saying 'first; second'", &Session::new(), 1)
                .unwrap(),
        );
        assert_eq!(plan.gated.len(), 1);
        assert_eq!(plan.gated[0].param_str("body"), Some("first; second"));
    }

    #[test]
    fn test_planning_is_deterministic() {
        let session = Session::new();
        let a = planner().plan("show ISSUE-1 and ISSUE-2", &session, 2).unwrap();
        let b = planner().plan("show ISSUE-1 and ISSUE-2", &session, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let err = planner().plan("move it to Done", &Session::new(), 1).unwrap_err();
        match err {
            OrchestratorError::AmbiguousIntent { missing } => assert_eq!(missing, vec!["issue_id"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_pronoun_uses_session_history() {
        let mut session = Session::new();
        session.record(1, "show PROJ-9", SessionAction::Reprompted, "");
        let plan = calls(planner().plan("move it to Done", &session, 2).unwrap());
        assert_eq!(plan.gated[0].param_str("issue_id"), Some("PROJ-9"));
    }

    #[test]
    fn test_unrecognized_asks_for_action() {
        let err = planner().plan("sing a song", &Session::new(), 1).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AmbiguousIntent { ref missing } if missing == &vec!["action".to_string()]
        ));
    }

    #[test]
    fn test_profile_scoping_yields_unknown_tool() {
        let profiles = ToolProfiles::new(builtin_registry().unwrap());
        let mut planner = IntentPlanner::new(profiles.registry_for(Profile::RequirementsEngineer));
        let err = planner
            .plan("update summary of ISSUE-1 to 'X'", &Session::new(), 1)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTool { .. }));

        let err = planner.plan("create a user story in PROJ", &Session::new(), 2).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTool { .. }));
    }

    #[test]
    fn test_interview_flow_ends_in_gated_create() {
        let mut planner = planner();
        let session = Session::new();
        assert!(matches!(
            planner.plan("create a user story in PROJ", &session, 1).unwrap(),
            PlanOutcome::Interview(InterviewReply::Ask { step: InterviewStep::UserStory, .. })
        ));
        assert!(planner.interview_active());
        planner.plan("As a user I want to export reports", &session, 2).unwrap();
        planner.plan("Managers need monthly numbers", &session, 3).unwrap();
        planner.plan("Export produces a CSV file", &session, 4).unwrap();

        let plan = calls(planner.plan("done", &session, 5).unwrap());
        assert!(!planner.interview_active());
        let call = &plan.gated[0];
        assert_eq!(call.name, "create_jira_issue");
        assert_eq!(call.id, "call_5_0");
        assert!(call.param_str("description").unwrap().contains("# Export produces a CSV file"));
    }

    #[test]
    fn test_interview_needs_project() {
        let err = planner().plan("create a user story", &Session::new(), 1).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AmbiguousIntent { ref missing } if missing == &vec!["project_key".to_string()]
        ));
    }
}
