// Tool execution engine
//
// Dispatches tool calls to the collaborator owning their capability.
// Read-only batches run concurrently; mutating calls only run from a
// `ConfirmedCall` and are never retried.

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tools::confirmation::ConfirmedCall;
use crate::tools::registry::{Collaborator, ToolRegistry};
use crate::tools::types::{Capability, ToolCall, ToolOutput};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool executor - routes calls to collaborators
pub struct ExecutionEngine {
    registry: ToolRegistry,
    collaborators: HashMap<Capability, Arc<dyn Collaborator>>,
    call_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            collaborators: HashMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Attach the collaborator serving its capability (replaces any previous one)
    pub fn with_collaborator(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        self.add_collaborator(collaborator);
        self
    }

    pub fn add_collaborator(&mut self, collaborator: Arc<dyn Collaborator>) {
        let capability = collaborator.capability();
        debug!(capability = capability.name(), "Collaborator attached");
        self.collaborators.insert(capability, collaborator);
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Capabilities with an attached collaborator
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self.collaborators.keys().copied().collect();
        caps.sort();
        caps
    }

    /// Execute a single read-only call
    #[instrument(skip(self, call), fields(tool = %call.name, id = %call.id))]
    pub async fn execute_read_only(&self, call: &ToolCall) -> OrchestratorResult<ToolOutput> {
        let spec = self.registry.resolve(&call.name)?;
        if call.mutating || spec.mutating {
            error!("Refusing to execute mutating call without confirmation");
            return Err(OrchestratorError::execution(
                &call.name,
                "mutating call requires confirmation",
            ));
        }
        self.dispatch(call).await
    }

    /// Execute read-only calls concurrently; results keep request order
    #[instrument(skip(self, calls), fields(count = calls.len()))]
    pub async fn execute_read_only_batch(
        &self,
        calls: &[ToolCall],
    ) -> Vec<OrchestratorResult<ToolOutput>> {
        info!("Executing {} read-only tool(s)", calls.len());
        join_all(calls.iter().map(|call| self.execute_read_only(call))).await
    }

    /// Execute a call that passed the confirmation gate
    #[instrument(skip(self, confirmed), fields(tool = %confirmed.call().name, id = %confirmed.call().id))]
    pub async fn execute_confirmed(&self, confirmed: ConfirmedCall) -> OrchestratorResult<ToolOutput> {
        let call = confirmed.into_call();
        let collaborator = Arc::clone(self.collaborator_for(&call)?);
        info!("Executing confirmed tool: {}", call.name);

        // Single attempt, never cancelled: the timeout only ends the wait.
        // Dropping the join handle detaches the task.
        let name = call.name.clone();
        let input = call.input();
        let task = tokio::spawn(async move { collaborator.invoke(&name, &input).await });
        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(Ok(output))) => {
                info!("Tool executed successfully");
                Ok(output.bind(&call))
            }
            Ok(Ok(Err(e))) => {
                error!("Tool execution failed: {:#}", e);
                Err(OrchestratorError::execution(&call.name, format!("{:#}", e)))
            }
            Ok(Err(join_error)) => {
                error!("Tool task aborted: {}", join_error);
                Err(OrchestratorError::execution(&call.name, join_error))
            }
            Err(_) => {
                warn!("No answer after {:?}; call left running", self.call_timeout);
                Err(OrchestratorError::OutcomeUnknown {
                    tool_name: call.name.clone(),
                    waited: format!("{:?}", self.call_timeout),
                })
            }
        }
    }

    /// Read-only viewer call that opens the record a mutation affected
    pub fn viewer_call(&self, call: &ToolCall, output: &ToolOutput) -> Option<ToolCall> {
        let spec = self.registry.resolve(&call.name).ok()?;
        let post = spec.post_action.as_ref()?;
        let record_id = output.affected_record.as_ref()?;
        let viewer = match self.registry.resolve(&post.tool) {
            Ok(viewer) => viewer,
            Err(_) => {
                warn!(viewer = %post.tool, "Viewer tool not available; skipping post-action");
                return None;
            }
        };

        let mut params = Map::new();
        params.insert(post.param.clone(), Value::String(record_id.clone()));
        Some(ToolCall::new(format!("{}_view", call.id), viewer, params))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Swap in a new tool set (profile change); collaborators stay attached
    pub fn set_registry(&mut self, registry: ToolRegistry) {
        debug!(tools = registry.len(), "Engine registry replaced");
        self.registry = registry;
    }

    fn collaborator_for(&self, call: &ToolCall) -> OrchestratorResult<&Arc<dyn Collaborator>> {
        let spec = self.registry.resolve(&call.name)?;
        self.collaborators.get(&spec.capability).ok_or_else(|| {
            OrchestratorError::execution(
                &call.name,
                format!("{} capability not configured", spec.capability.name()),
            )
        })
    }

    async fn dispatch(&self, call: &ToolCall) -> OrchestratorResult<ToolOutput> {
        let collaborator = self.collaborator_for(call)?;

        let input = call.input();
        match tokio::time::timeout(self.call_timeout, collaborator.invoke(&call.name, &input)).await {
            Ok(Ok(output)) => {
                info!("Tool executed successfully");
                Ok(output.bind(call))
            }
            Ok(Err(e)) => {
                error!("Tool execution failed: {:#}", e);
                Err(OrchestratorError::execution(&call.name, format!("{:#}", e)))
            }
            Err(_) => {
                error!("Tool execution timed out after {:?}", self.call_timeout);
                Err(OrchestratorError::execution(
                    &call.name,
                    format!("timed out after {:?}", self.call_timeout),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::builtin_registry;
    use crate::tools::confirmation::{ConfirmationGate, GateDecision};
    use crate::tools::types::SourceRecord;
    use crate::tools::types::RecordKind;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    // Mock collaborator recording every invocation
    struct MockTracker {
        invoked: Mutex<Vec<String>>,
        should_fail: bool,
    }

    impl MockTracker {
        fn new(should_fail: bool) -> Arc<Self> {
            Arc::new(Self {
                invoked: Mutex::new(Vec::new()),
                should_fail,
            })
        }

        fn invocations(&self) -> Vec<String> {
            self.invoked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Collaborator for MockTracker {
        fn capability(&self) -> Capability {
            Capability::IssueTracker
        }

        async fn invoke(&self, tool_name: &str, input: &Value) -> Result<ToolOutput> {
            self.invoked.lock().unwrap().push(tool_name.to_string());
            if self.should_fail {
                anyhow::bail!("Mock failure");
            }
            let key = input["issue_id"].as_str().unwrap_or("?").to_string();
            Ok(ToolOutput::report(format!("{} ok", key))
                .with_record(SourceRecord::new(&key, RecordKind::Issue, "Summary: X"))
                .affecting(&key))
        }
    }

    fn call(name: &str, issue: &str) -> ToolCall {
        let registry = builtin_registry().unwrap();
        let mut params = Map::new();
        params.insert("issue_id".into(), json!(issue));
        if name == "update_jira_issue" {
            params.insert("summary".into(), json!("X"));
        }
        ToolCall::new(format!("call_0_{}", issue), registry.resolve(name).unwrap(), params)
    }

    fn engine(tracker: Arc<MockTracker>) -> ExecutionEngine {
        ExecutionEngine::new(builtin_registry().unwrap()).with_collaborator(tracker)
    }

    #[tokio::test]
    async fn test_read_only_batch_keeps_order() {
        let tracker = MockTracker::new(false);
        let engine = engine(tracker.clone());
        let calls = vec![
            call("get_jira_issue_details", "ISSUE-1"),
            call("get_jira_issue_details", "ISSUE-2"),
        ];

        let results = engine.execute_read_only_batch(&calls).await;
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.report, "ISSUE-1 ok");
        assert_eq!(first.call_id, calls[0].id);
        assert_eq!(results[1].as_ref().unwrap().report, "ISSUE-2 ok");
        assert_eq!(tracker.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_mutating_call_refused_without_confirmation() {
        let tracker = MockTracker::new(false);
        let engine = engine(tracker.clone());

        let err = engine
            .execute_read_only(&call("update_jira_issue", "ISSUE-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requires confirmation"));
        assert!(tracker.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_call_executes_and_offers_viewer() {
        let tracker = MockTracker::new(false);
        let engine = engine(tracker.clone());
        let registry = builtin_registry().unwrap();
        let update = call("update_jira_issue", "ISSUE-1");

        let mut gate = ConfirmationGate::default();
        gate.propose(update.clone(), registry.resolve("update_jira_issue").unwrap());
        let token = match gate.reply("yes").unwrap() {
            GateDecision::Confirmed(token) => token,
            other => panic!("expected confirmation, got {:?}", other),
        };

        let output = engine.execute_confirmed(token).await.unwrap();
        assert_eq!(output.affected_record.as_deref(), Some("ISSUE-1"));
        assert_eq!(tracker.invocations(), vec!["update_jira_issue"]);

        let viewer = engine.viewer_call(&update, &output).unwrap();
        assert_eq!(viewer.name, "show_jira_issue");
        assert_eq!(viewer.param_str("issue_id"), Some("ISSUE-1"));
        assert!(!viewer.mutating);
    }

    #[tokio::test]
    async fn test_failure_maps_to_tool_execution_error() {
        let tracker = MockTracker::new(true);
        let engine = engine(tracker.clone());

        let err = engine
            .execute_read_only(&call("get_jira_issue_details", "ISSUE-1"))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::ToolExecutionError { tool_name, cause } => {
                assert_eq!(tool_name, "get_jira_issue_details");
                assert!(cause.contains("Mock failure"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // Answers only after `delay`, recording completion
    struct SlowTracker {
        delay: Duration,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Collaborator for SlowTracker {
        fn capability(&self) -> Capability {
            Capability::IssueTracker
        }

        async fn invoke(&self, tool_name: &str, _input: &Value) -> Result<ToolOutput> {
            tokio::time::sleep(self.delay).await;
            self.completed.lock().unwrap().push(tool_name.to_string());
            Ok(ToolOutput::report("done"))
        }
    }

    fn confirmed(update: &ToolCall) -> ConfirmedCall {
        let registry = builtin_registry().unwrap();
        let mut gate = ConfirmationGate::default();
        gate.propose(update.clone(), registry.resolve(&update.name).unwrap());
        match gate.reply("yes").unwrap() {
            GateDecision::Confirmed(token) => token,
            other => panic!("expected confirmation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_confirmed_call_keeps_running_after_timeout() {
        let tracker = Arc::new(SlowTracker {
            delay: Duration::from_millis(300),
            completed: Mutex::new(Vec::new()),
        });
        let engine = ExecutionEngine::new(builtin_registry().unwrap())
            .with_collaborator(tracker.clone())
            .with_call_timeout(Duration::from_millis(50));

        let err = engine
            .execute_confirmed(confirmed(&call("update_jira_issue", "ISSUE-1")))
            .await
            .unwrap_err();
        match err {
            OrchestratorError::OutcomeUnknown { tool_name, waited } => {
                assert_eq!(tool_name, "update_jira_issue");
                assert_eq!(waited, "50ms");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(tracker.completed.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*tracker.completed.lock().unwrap(), vec!["update_jira_issue"]);
    }

    #[tokio::test]
    async fn test_read_only_timeout_reports_sub_second_duration() {
        let tracker = Arc::new(SlowTracker {
            delay: Duration::from_millis(300),
            completed: Mutex::new(Vec::new()),
        });
        let engine = ExecutionEngine::new(builtin_registry().unwrap())
            .with_collaborator(tracker)
            .with_call_timeout(Duration::from_millis(50));

        let err = engine
            .execute_read_only(&call("get_jira_issue_details", "ISSUE-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 50ms"), "{}", err);
    }

    #[tokio::test]
    async fn test_set_registry_limits_tools() {
        let mut engine = engine(MockTracker::new(false));
        let narrowed = builtin_registry().unwrap().scoped(["get_jira_issue_details"]);
        engine.set_registry(narrowed);

        let err = engine
            .execute_read_only(&call("get_jira_comments", "ISSUE-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let engine = ExecutionEngine::new(builtin_registry().unwrap());
        let err = engine
            .execute_read_only(&call("get_jira_issue_details", "ISSUE-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("issue tracker capability not configured"));
    }
}
