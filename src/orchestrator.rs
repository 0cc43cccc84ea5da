// Orchestrator - control flow glue
//
// utterance -> planner -> read-only calls (concurrent) -> confirmation gate
// (mutating calls, one at a time) -> engine -> viewer call -> attribution
// -> response. Every turn is recorded in the session.
//
// One utterance is handled completely before the next (`&mut self`).

use crate::attribution::{AttributedStatement, AttributionSettings, SourceAttributor};
use crate::config::{Config, ResponseTemplates};
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::planner::{IntentPlanner, InterviewReply, Plan, PlanOutcome};
use crate::session::{Session, SessionAction};
use crate::tools::catalog::builtin_registry;
use crate::tools::confirmation::{
    ConfirmationGate, ConfirmationVocabulary, ConfirmedCall, GateDecision, PendingConfirmation, ReplyKind,
};
use crate::tools::executor::ExecutionEngine;
use crate::tools::implementations::{
    ConfluenceClient, GoogleSearch, JiraClient, RequirementGraph, RequirementStore, SharedProfiles,
    SystemClock, ToolCatalogManager,
};
use crate::tools::profiles::{AvailabilityChange, Profile, ToolProfiles};
use crate::tools::registry::{Collaborator, ToolRegistry};
use crate::tools::types::{Capability, SourceRecord, ToolCall, ToolOutput};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What the user sees for one utterance
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub text: String,
    /// Tool outputs produced this turn, in execution order
    pub outputs: Vec<ToolOutput>,
    pub attribution: Option<AttributedStatement>,
    /// Preview of the call now waiting for yes/no
    pub awaiting_confirmation: Option<String>,
}

impl Response {
    fn push(&mut self, section: impl Into<String>) {
        let section = section.into();
        if section.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        self.text.push_str(&section);
    }

    fn merge(&mut self, other: Response) {
        self.push(other.text);
        self.outputs.extend(other.outputs);
        if other.attribution.is_some() {
            self.attribution = other.attribution;
        }
        if other.awaiting_confirmation.is_some() {
            self.awaiting_confirmation = other.awaiting_confirmation;
        }
    }
}

pub struct OrchestratorBuilder {
    profiles: ToolProfiles,
    profile: Profile,
    collaborators: Vec<Arc<dyn Collaborator>>,
    vocabulary: ConfirmationVocabulary,
    confirmation_timeout: Option<chrono::Duration>,
    call_timeout: Option<std::time::Duration>,
    attribution: AttributionSettings,
    templates: ResponseTemplates,
}

impl OrchestratorBuilder {
    pub fn new(profiles: ToolProfiles) -> Self {
        Self {
            profiles,
            profile: Profile::default(),
            collaborators: Vec::new(),
            vocabulary: ConfirmationVocabulary::default(),
            confirmation_timeout: None,
            call_timeout: None,
            attribution: AttributionSettings::default(),
            templates: ResponseTemplates::default(),
        }
    }

    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn collaborator(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        self.collaborators.push(collaborator);
        self
    }

    pub fn vocabulary(mut self, vocabulary: ConfirmationVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn confirmation_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    pub fn call_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn attribution(mut self, settings: AttributionSettings) -> Self {
        self.attribution = settings;
        self
    }

    pub fn templates(mut self, templates: ResponseTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn build(self) -> Orchestrator {
        let registry = self.profiles.registry_for(self.profile);
        let profiles: SharedProfiles = Arc::new(RwLock::new(self.profiles));

        let mut engine = ExecutionEngine::new(registry.clone());
        engine.add_collaborator(Arc::new(ToolCatalogManager::new(profiles.clone(), self.profile)));
        for collaborator in self.collaborators {
            engine.add_collaborator(collaborator);
        }
        if let Some(timeout) = self.call_timeout {
            engine = engine.with_call_timeout(timeout);
        }

        let mut gate = ConfirmationGate::new(self.vocabulary);
        if let Some(timeout) = self.confirmation_timeout {
            gate = gate.with_timeout(timeout);
        }

        let session_id = Uuid::new_v4();
        info!(
            session = %session_id,
            profile = %self.profile,
            tools = registry.len(),
            "Orchestrator ready"
        );
        Orchestrator {
            session_id,
            profile: self.profile,
            profiles,
            planner: IntentPlanner::new(registry),
            gate,
            engine,
            attributor: SourceAttributor::new(self.attribution),
            templates: self.templates,
            session: Session::new(),
            queue: VecDeque::new(),
            consulted: Vec::new(),
            turn: 0,
        }
    }
}

/// Collaborators for every service the configuration enables
///
/// Clock, requirement store and requirement graph are always available.
/// The store and graph load their snapshots when a path is configured.
pub fn collaborators_from_config(config: &Config) -> Result<Vec<Arc<dyn Collaborator>>> {
    let store = match &config.requirements.store_path {
        Some(path) => RequirementStore::open(path)?,
        None => RequirementStore::in_memory(),
    };
    let graph = match &config.requirements.graph_path {
        Some(path) => RequirementGraph::open(path)?,
        None => RequirementGraph::new(),
    };
    let mut collaborators: Vec<Arc<dyn Collaborator>> = vec![
        Arc::new(SystemClock::new()),
        Arc::new(store),
        Arc::new(graph),
    ];

    match config.jira_credentials() {
        Some(jira) => collaborators.push(Arc::new(
            JiraClient::new(&jira.url, &jira.email, &jira.api_token)?.with_browser(config.open_in_browser),
        )),
        None => warn!("Jira not configured; issue tracker tools are unavailable"),
    }
    match config.confluence_credentials() {
        Some(wiki) => collaborators.push(Arc::new(
            ConfluenceClient::new(&wiki.url, &wiki.email, &wiki.api_token)?.with_browser(config.open_in_browser),
        )),
        None => warn!("Confluence not configured; document space tools are unavailable"),
    }
    match config.search_credentials() {
        Some(search) => collaborators.push(Arc::new(GoogleSearch::new(&search.api_key, &search.cse_id)?)),
        None => warn!("Google search not configured; web search is unavailable"),
    }
    Ok(collaborators)
}

pub struct Orchestrator {
    session_id: Uuid,
    profile: Profile,
    /// Catalog and role assignments; planner and engine hold a copy of the active set
    profiles: SharedProfiles,
    planner: IntentPlanner,
    gate: ConfirmationGate,
    engine: ExecutionEngine,
    attributor: SourceAttributor,
    templates: ResponseTemplates,
    session: Session,
    /// Mutating calls of the current plan waiting for their turn at the gate
    queue: VecDeque<ToolCall>,
    /// Every record consulted this session, latest version per id
    consulted: Vec<SourceRecord>,
    turn: usize,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorResult<OrchestratorBuilder> {
        Ok(OrchestratorBuilder::new(ToolProfiles::new(builtin_registry()?)))
    }

    /// Orchestrator wired to the services in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder()?
            .profile(config.profile())
            .vocabulary(config.confirmation.vocabulary())
            .attribution(config.attribution)
            .templates(ResponseTemplates::with_overrides(&config.templates));
        if let Some(secs) = config.confirmation.timeout_secs {
            let timeout = chrono::Duration::from_std(std::time::Duration::from_secs(secs))
                .context("confirmation.timeout_secs is out of range")?;
            builder = builder.confirmation_timeout(timeout);
        }
        for collaborator in collaborators_from_config(config)? {
            builder = builder.collaborator(collaborator);
        }
        Ok(builder.build())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Tools enabled for the active profile
    pub fn registry(&self) -> &ToolRegistry {
        self.planner.registry()
    }

    /// Enabled tools and the catalog tools that could be enabled
    pub async fn tool_availability(&self) -> (Vec<String>, Vec<String>) {
        let profiles = self.profiles.read().await;
        (profiles.tools_for(self.profile), profiles.available_but_disabled(self.profile))
    }

    /// Enable or disable a catalog tool for the active profile
    pub async fn set_tool_availability(&mut self, tool_name: &str, enable: bool) -> OrchestratorResult<AvailabilityChange> {
        let change = self
            .profiles
            .write()
            .await
            .set_tool_availability(self.profile, tool_name, enable)?;
        self.refresh_registry().await;
        Ok(change)
    }

    /// Rebuild the planner's and engine's tool set from the profile table
    async fn refresh_registry(&mut self) {
        let registry = self.profiles.read().await.registry_for(self.profile);
        info!(profile = %self.profile, tools = registry.len(), "Tool set refreshed");
        self.planner.set_registry(registry.clone());
        self.engine.set_registry(registry);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        self.gate.pending()
    }

    /// Mutating calls queued behind the pending one
    pub fn queued_calls(&self) -> usize {
        self.queue.len()
    }

    pub fn greeting(&self) -> String {
        self.templates.render("greeting", &[("profile", self.profile.name())])
    }

    /// Attribute a statement against every record consulted this session
    pub fn attribute(&self, statement: &str) -> AttributedStatement {
        self.attributor.attribute(statement, &self.consulted)
    }

    /// Handle one user utterance
    #[instrument(skip(self, utterance), fields(session = %self.session_id))]
    pub async fn handle(&mut self, utterance: &str) -> Response {
        self.turn += 1;
        let turn = self.turn;
        let utterance = utterance.trim();
        debug!(turn, pending = self.gate.has_pending(), "Handling utterance");

        if self.gate.has_pending() {
            self.handle_reply(utterance, turn).await
        } else {
            self.handle_request(utterance, turn).await
        }
    }

    /// Discard anything unconfirmed; nothing pending ever executes
    pub fn end_session(&mut self) -> Response {
        let mut response = Response::default();
        self.planner.cancel_interview();
        if let Some(pending) = self.gate.expire() {
            let text = self.templates.render("expired", &[("tool", &pending.tool_call.name)]);
            self.session.record(
                self.turn,
                "(session end)",
                SessionAction::Expired {
                    call: pending.tool_call,
                },
                &text,
            );
            response.push(text);
        }
        self.drop_queue("session ended");
        response.push(self.templates.render("session_ended", &[]));
        info!(session = %self.session_id, entries = self.session.len(), "Session ended");
        response
    }

    async fn handle_request(&mut self, utterance: &str, turn: usize) -> Response {
        match self.planner.plan(utterance, &self.session, turn) {
            Ok(PlanOutcome::Calls(plan)) => self.run_plan(plan, utterance, turn).await,
            Ok(PlanOutcome::Interview(reply)) => self.interview_response(reply, utterance, turn),
            Ok(PlanOutcome::Protocol) => {
                let protocol = self.session.protocol();
                self.session.record(turn, utterance, SessionAction::Protocol, "");
                Response {
                    text: protocol,
                    ..Default::default()
                }
            }
            Err(e) => self.error_response(e, utterance, turn),
        }
    }

    async fn handle_reply(&mut self, utterance: &str, turn: usize) -> Response {
        let pending_call = self.gate.pending().map(|p| p.tool_call.clone());

        match self.gate.reply(utterance) {
            Ok(GateDecision::Confirmed(token)) => {
                let mut response = self.run_confirmed(token, utterance, turn).await;
                self.propose_next(&mut response, utterance, turn);
                response
            }
            Ok(GateDecision::Rejected(pending)) => {
                let mut response = Response::default();
                let text = self.templates.render("rejected", &[("tool", &pending.tool_call.name)]);
                self.session.record(
                    turn,
                    utterance,
                    SessionAction::Rejected {
                        call: pending.tool_call,
                    },
                    &text,
                );
                response.push(text);
                self.propose_next(&mut response, utterance, turn);
                response
            }
            Ok(GateDecision::Reprompt { preview }) => self.replan_or_reprompt(utterance, turn, preview).await,
            Err(OrchestratorError::ConfirmationExpired { tool_name }) => {
                self.drop_queue("confirmation timed out");
                let text = self.templates.render("confirmation_timeout", &[("tool", &tool_name)]);
                let action = match pending_call {
                    Some(call) => SessionAction::Expired { call },
                    None => SessionAction::Failed,
                };
                self.session.record(turn, utterance, action, &text);
                let mut response = Response {
                    text,
                    ..Default::default()
                };
                // A new request arriving after the timeout is still served
                if self.gate.vocabulary().classify(utterance) == ReplyKind::Ambiguous {
                    let next = self.handle_request(utterance, turn).await;
                    response.merge(next);
                }
                response
            }
            Err(e) => self.error_response(e, utterance, turn),
        }
    }

    /// A reply outside the vocabulary: a new mutation supersedes, anything else re-prompts
    async fn replan_or_reprompt(&mut self, utterance: &str, turn: usize, preview: String) -> Response {
        match self.planner.plan(utterance, &self.session, turn) {
            Ok(PlanOutcome::Calls(plan)) if plan.has_mutations() => {
                self.drop_queue("superseded by a new request");
                return self.run_plan(plan, utterance, turn).await;
            }
            Ok(PlanOutcome::Interview(_)) => {
                self.planner.cancel_interview();
            }
            _ => {}
        }

        let text = self.templates.render("reprompt", &[("preview", &preview)]);
        self.session.record(turn, utterance, SessionAction::Reprompted, &text);
        Response {
            text,
            awaiting_confirmation: Some(preview),
            ..Default::default()
        }
    }

    async fn run_plan(&mut self, plan: Plan, utterance: &str, turn: usize) -> Response {
        let mut response = Response::default();
        if !plan.immediate.is_empty() {
            self.run_read_only(&plan.immediate, utterance, turn, &mut response)
                .await;
        }

        let mut gated = plan.gated.into_iter();
        if let Some(first) = gated.next() {
            self.queue.extend(gated);
            self.propose(first, utterance, turn, &mut response);
        }

        if response.text.is_empty() {
            response.push(self.templates.render("nothing_to_report", &[]));
        }
        response
    }

    async fn run_read_only(&mut self, calls: &[ToolCall], utterance: &str, turn: usize, response: &mut Response) {
        let results = self.engine.execute_read_only_batch(calls).await;

        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => failures.push(self.failure_text(&e)),
            }
        }

        let mut sections = Vec::new();
        let attributed = if outputs.is_empty() {
            None
        } else {
            let attributed = self.attribute_outputs(&outputs);
            sections.push(self.attributed_text(&attributed));
            Some(attributed)
        };
        sections.extend(failures);
        let text = sections.join("\n");

        self.session.record(
            turn,
            utterance,
            SessionAction::Executed {
                calls: calls.to_vec(),
            },
            &text,
        );
        for output in &outputs {
            self.session.remember_output(output);
        }

        response.push(text);
        response.outputs.extend(outputs);
        response.attribution = attributed;
    }

    async fn run_confirmed(&mut self, token: ConfirmedCall, utterance: &str, turn: usize) -> Response {
        let call = token.call().clone();
        let mut response = Response::default();
        let changes_catalog = self
            .engine
            .registry()
            .resolve(&call.name)
            .map_or(false, |spec| spec.capability == Capability::ToolCatalog);

        let output = match self.engine.execute_confirmed(token).await {
            Ok(output) => output,
            Err(e) => {
                let mut text = self.failure_text(&e);
                if !self.queue.is_empty() {
                    let count = self.queue.len().to_string();
                    text.push('\n');
                    text.push_str(
                        &self
                            .templates
                            .render("queue_dropped", &[("count", &count), ("tool", &call.name)]),
                    );
                    self.drop_queue("an earlier change failed");
                }
                let action = match e {
                    OrchestratorError::OutcomeUnknown { .. } => SessionAction::OutcomeUnknown { call },
                    _ => SessionAction::Failed,
                };
                self.session.record(turn, utterance, action, &text);
                response.push(text);
                return response;
            }
        };
        self.session.remember_output(&output);
        if changes_catalog {
            self.refresh_registry().await;
        }

        let mut outputs = vec![output];
        let mut failures = Vec::new();
        if let Some(viewer) = self.engine.viewer_call(&call, &outputs[0]) {
            match self.engine.execute_read_only(&viewer).await {
                Ok(view) => outputs.push(view),
                Err(e) => failures.push(self.failure_text(&e)),
            }
        }

        let attributed = self.attribute_outputs(&outputs);
        let mut sections = vec![self.attributed_text(&attributed)];
        sections.extend(failures);
        let text = sections.join("\n");

        self.session.record(turn, utterance, SessionAction::Confirmed { call }, &text);
        response.push(text);
        response.outputs = outputs;
        response.attribution = Some(attributed);
        response
    }

    fn propose(&mut self, call: ToolCall, utterance: &str, turn: usize, response: &mut Response) {
        let spec = match self.planner.registry().resolve(&call.name) {
            Ok(spec) => spec.clone(),
            Err(e) => {
                response.push(self.failure_text(&e));
                return;
            }
        };

        let outcome = self.gate.propose(call.clone(), &spec);
        if let Some(old) = outcome.superseded {
            let text = self.templates.render("superseded", &[("tool", &old.tool_call.name)]);
            self.session.record(
                turn,
                utterance,
                SessionAction::Expired { call: old.tool_call },
                &text,
            );
            response.push(text);
        }

        let text = self.templates.render("confirm_prompt", &[("preview", &outcome.preview)]);
        self.session.record(turn, utterance, SessionAction::Proposed { call }, &text);
        response.push(text);
        response.awaiting_confirmation = Some(outcome.preview);
    }

    fn propose_next(&mut self, response: &mut Response, utterance: &str, turn: usize) {
        if self.gate.has_pending() {
            return;
        }
        if let Some(next) = self.queue.pop_front() {
            self.propose(next, utterance, turn, response);
        }
    }

    fn drop_queue(&mut self, reason: &str) {
        if !self.queue.is_empty() {
            warn!(count = self.queue.len(), reason, "Dropping queued mutating calls");
            self.queue.clear();
        }
    }

    fn attribute_outputs(&mut self, outputs: &[ToolOutput]) -> AttributedStatement {
        let statement = outputs
            .iter()
            .map(|o| o.report.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let records: Vec<SourceRecord> = outputs.iter().flat_map(|o| o.consulted_records()).collect();

        for record in &records {
            match self.consulted.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => self.consulted.push(record.clone()),
            }
        }
        self.attributor.attribute(&statement, &records)
    }

    fn attributed_text(&self, attributed: &AttributedStatement) -> String {
        let mut parts = Vec::new();
        let body = attributed.render();
        if !body.is_empty() {
            parts.push(body);
        }
        if attributed.is_tentative() {
            parts.push(self.templates.render("tentative_note", &[]));
        }
        if attributed.has_gaps() {
            let count = attributed.gaps.len().to_string();
            parts.push(self.templates.render("gap_note", &[("count", &count)]));
        }
        parts.join("\n")
    }

    fn interview_response(&mut self, reply: InterviewReply, utterance: &str, turn: usize) -> Response {
        let text = match &reply {
            InterviewReply::Ask { step, repeat } => {
                let project = self.planner.interview_project().unwrap_or_default();
                let prompt = self.templates.render(step.prompt_key(), &[("project", project)]);
                if *repeat {
                    format!("{}\n{}", self.templates.render("interview_repeat", &[]), prompt)
                } else {
                    prompt
                }
            }
            InterviewReply::CriterionAdded { count } => self
                .templates
                .render("interview_criterion_added", &[("count", &count.to_string())]),
            InterviewReply::Cancelled => self.templates.render("interview_cancelled", &[]),
            // Completion is turned into a plan by the planner
            InterviewReply::Complete(_) => self.templates.render("nothing_to_report", &[]),
        };
        self.session.record(turn, utterance, SessionAction::Interview, &text);
        Response {
            text,
            ..Default::default()
        }
    }

    fn error_response(&mut self, error: OrchestratorError, utterance: &str, turn: usize) -> Response {
        let (text, action) = match error {
            OrchestratorError::AmbiguousIntent { missing } => {
                let text = if missing == ["action"] {
                    self.templates.render("clarify_action", &[])
                } else {
                    self.templates.render("clarify", &[("missing", &missing.join(", "))])
                };
                (text, SessionAction::Clarification { missing })
            }
            OrchestratorError::NoPendingConfirmation => {
                (self.templates.render("no_pending", &[]), SessionAction::Failed)
            }
            other => {
                warn!(error = %other, "Request failed");
                (self.failure_text(&other), SessionAction::Failed)
            }
        };
        self.session.record(turn, utterance, action, &text);
        Response {
            text,
            ..Default::default()
        }
    }

    fn failure_text(&self, error: &OrchestratorError) -> String {
        match error {
            OrchestratorError::ToolExecutionError { tool_name, cause } => self
                .templates
                .render("tool_failed", &[("tool", tool_name), ("cause", cause)]),
            OrchestratorError::OutcomeUnknown { tool_name, waited } => self
                .templates
                .render("outcome_unknown", &[("tool", tool_name), ("waited", waited)]),
            OrchestratorError::UnknownTool { name } => self
                .templates
                .render("unknown_tool", &[("tool", name), ("profile", self.profile.name())]),
            other => other.to_string(),
        }
    }
}
